//! Presentation side of the watcher: indicator lines on stdout, menu entries in the log.

use async_trait::async_trait;
use pinmark_core::watcher::{MenuEntry, MenuHost};
use pinmark_core::{Indicator, Result, TabId};
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct IndicatorLine {
    tab_id: TabId,
    bookmarked: bool,
}

/// One JSON line per indicator change, for whatever front end reads our stdout.
pub struct StdoutIndicator;

#[async_trait]
impl Indicator for StdoutIndicator {
    async fn set(&self, tab: TabId, bookmarked: bool) {
        let line = IndicatorLine {
            tab_id: tab,
            bookmarked,
        };
        let Ok(s) = serde_json::to_string(&line) else {
            return;
        };
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{s}").and_then(|_| out.flush()) {
            tracing::warn!("cannot write indicator: {e}");
        }
    }
}

pub struct LogMenuHost;

#[async_trait]
impl MenuHost for LogMenuHost {
    async fn create(&self, entry: &MenuEntry) -> Result<()> {
        tracing::info!(id = entry.id, title = entry.title, contexts = ?entry.contexts, "menu entry created");
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        tracing::info!(%id, "menu entry removed");
        Ok(())
    }
}
