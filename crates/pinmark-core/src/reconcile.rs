//! Per-tab "is this page bookmarked" indicator.

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::post::is_http_url;
use crate::remote::RemoteBookmarkStore;

pub type TabId = i64;

/// A tab finished navigating. `url` is only set when it changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationEvent {
    pub tab_id: TabId,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub incognito: bool,
}

#[async_trait]
pub trait Indicator: Send + Sync {
    async fn set(&self, tab: TabId, bookmarked: bool);
}

#[async_trait]
pub trait TabDirectory: Send + Sync {
    async fn tabs_showing(&self, url: &str) -> Vec<TabId>;
}

/// Open tabs and the url each one shows, fed from navigation events.
#[derive(Debug, Default)]
pub struct TabTable {
    tabs: Mutex<BTreeMap<TabId, String>>,
}

impl TabTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: &NavigationEvent) {
        if let (Some(url), Ok(mut tabs)) = (&event.url, self.tabs.lock()) {
            tabs.insert(event.tab_id, url.clone());
        }
    }

    pub fn close(&self, tab: TabId) {
        if let Ok(mut tabs) = self.tabs.lock() {
            tabs.remove(&tab);
        }
    }

    pub fn len(&self) -> usize {
        self.tabs.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TabDirectory for TabTable {
    async fn tabs_showing(&self, url: &str) -> Vec<TabId> {
        match self.tabs.lock() {
            Ok(tabs) => tabs
                .iter()
                .filter(|(_, u)| u.as_str() == url)
                .map(|(id, _)| *id)
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

pub struct TabStateReconciler {
    remote: Arc<dyn RemoteBookmarkStore>,
    indicator: Arc<dyn Indicator>,
    tabs: Arc<dyn TabDirectory>,
}

impl TabStateReconciler {
    pub fn new(
        remote: Arc<dyn RemoteBookmarkStore>,
        indicator: Arc<dyn Indicator>,
        tabs: Arc<dyn TabDirectory>,
    ) -> Self {
        Self {
            remote,
            indicator,
            tabs,
        }
    }

    /// Looks the new url up and updates that tab only. Private tabs are never looked up.
    pub async fn on_navigation(&self, event: &NavigationEvent) {
        if event.incognito {
            return;
        }
        let Some(url) = event.url.as_deref() else {
            return;
        };
        let bookmarked = if is_http_url(url) {
            match self.remote.get(url).await {
                Ok(found) => found.is_some(),
                Err(e) => {
                    tracing::debug!(tab = event.tab_id, "bookmark lookup failed: {e}");
                    false
                }
            }
        } else {
            false
        };
        self.indicator.set(event.tab_id, bookmarked).await;
    }

    /// Sets the indicator of every tab showing `url`.
    pub async fn mark(&self, url: &str, bookmarked: bool) {
        let tabs = self.tabs.tabs_showing(url).await;
        join_all(tabs.into_iter().map(|tab| self.indicator.set(tab, bookmarked))).await;
    }

    pub async fn after_save(&self, url: &str) {
        self.mark(url, true).await
    }

    /// Called whether or not the delete went through.
    pub async fn after_delete(&self, url: &str) {
        self.mark(url, false).await
    }
}
