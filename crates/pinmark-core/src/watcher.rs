//! Background watcher: the subscriptions switched by the `ping` and `menu` options.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::options::Options;
use crate::reconcile::{NavigationEvent, TabStateReconciler};
use crate::sync::{SubscriptionRegistry, Toggle};

pub const GATE_PING: &str = "ping";
pub const GATE_MENU: &str = "menu";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuEntry {
    pub id: &'static str,
    pub title: &'static str,
    /// Where the entry shows up (`page`, `link`).
    pub contexts: &'static [&'static str],
}

pub const MENU_ENTRIES: [MenuEntry; 2] = [
    MenuEntry {
        id: "page",
        title: "Save page to Pinboard",
        contexts: &["page"],
    },
    MenuEntry {
        id: "link",
        title: "Save link to Pinboard",
        contexts: &["link"],
    },
];

#[async_trait]
pub trait MenuHost: Send + Sync {
    async fn create(&self, entry: &MenuEntry) -> Result<()>;
    async fn remove(&self, id: &str) -> Result<()>;
}

/// Context-menu entries, present while the `menu` option is on.
pub struct ContextMenuWatch {
    host: Arc<dyn MenuHost>,
}

impl ContextMenuWatch {
    pub fn new(host: Arc<dyn MenuHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Toggle for ContextMenuWatch {
    /// All entries or none: a failed create removes the ones already made.
    async fn install(&self) -> Result<()> {
        for (i, entry) in MENU_ENTRIES.iter().enumerate() {
            if let Err(e) = self.host.create(entry).await {
                for made in MENU_ENTRIES[..i].iter().rev() {
                    if let Err(undo) = self.host.remove(made.id).await {
                        tracing::warn!(id = made.id, "cannot remove menu entry: {undo}");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn uninstall(&self) -> Result<()> {
        for entry in &MENU_ENTRIES {
            self.host.remove(entry.id).await?;
        }
        Ok(())
    }
}

/// Feeds navigation events to the reconciler while the `ping` option is on.
pub struct NavigationWatch {
    events: broadcast::Sender<NavigationEvent>,
    reconciler: Arc<TabStateReconciler>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NavigationWatch {
    pub fn new(events: broadcast::Sender<NavigationEvent>, reconciler: Arc<TabStateReconciler>) -> Self {
        Self {
            events,
            reconciler,
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Toggle for NavigationWatch {
    async fn install(&self) -> Result<()> {
        let mut rx = self.events.subscribe();
        let reconciler = self.reconciler.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => reconciler.on_navigation(&ev).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "navigation events dropped")
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        if let Ok(mut task) = self.task.lock() {
            if let Some(old) = task.replace(handle) {
                old.abort();
            }
        }
        Ok(())
    }

    async fn uninstall(&self) -> Result<()> {
        let handle = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(h) = handle {
            h.abort();
        }
        Ok(())
    }
}

pub struct BackgroundWatcher {
    registry: SubscriptionRegistry,
    navigation: broadcast::Sender<NavigationEvent>,
}

impl BackgroundWatcher {
    pub async fn new(reconciler: Arc<TabStateReconciler>, menu: Arc<dyn MenuHost>) -> Self {
        let (navigation, _) = broadcast::channel(256);
        let registry = SubscriptionRegistry::new();
        registry
            .register(
                GATE_PING,
                Box::new(NavigationWatch::new(navigation.clone(), reconciler)),
            )
            .await;
        registry
            .register(GATE_MENU, Box::new(ContextMenuWatch::new(menu)))
            .await;
        Self {
            registry,
            navigation,
        }
    }

    /// Hands an event to the navigation watch. Dropped when `ping` is off.
    pub fn navigated(&self, event: NavigationEvent) -> bool {
        self.navigation.send(event).is_ok()
    }

    /// Brings both gates in line with `options`.
    pub async fn apply_options(&self, options: &Options) -> Result<()> {
        self.registry.set(GATE_PING, options.ping).await?;
        self.registry.set(GATE_MENU, options.menu).await?;
        Ok(())
    }

    pub async fn is_active(&self, gate: &str) -> bool {
        self.registry.is_active(gate).await
    }
}
