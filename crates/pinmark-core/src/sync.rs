//! Keeps the options of every running context in step.
//!
//! A context that edits options persists them and broadcasts the full record on
//! the `options` topic. Receivers compare it with what they last knew and react
//! only to a real change, so an echo or a duplicate never re-triggers anything.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::bus::{ContextId, LocalBus};
use crate::error::{PinError, Result};
use crate::kv::KvStore;
use crate::options::Options;

pub const TOPIC_OPTIONS: &str = "options";

pub struct ConfigSync {
    context: ContextId,
    bus: LocalBus,
    kv: Arc<dyn KvStore>,
    current: Arc<Mutex<Options>>,
}

fn swap_if_changed(current: &Mutex<Options>, incoming: Options) -> bool {
    let Ok(mut cur) = current.lock() else {
        return false;
    };
    if *cur == incoming {
        return false;
    }
    *cur = incoming;
    true
}

impl ConfigSync {
    /// Loads the stored options as the starting point.
    pub async fn new(context: ContextId, bus: LocalBus, kv: Arc<dyn KvStore>) -> Result<Self> {
        let options = Options::load(kv.as_ref()).await?;
        Ok(Self {
            context,
            bus,
            kv,
            current: Arc::new(Mutex::new(options)),
        })
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn current(&self) -> Options {
        self.current.lock().map(|o| *o).unwrap_or_default()
    }

    /// Takes `incoming` as the current value when it differs. Returns whether it did.
    pub fn apply(&self, incoming: Options) -> bool {
        swap_if_changed(&self.current, incoming)
    }

    /// Listens for options published by other contexts; `on_change` runs for each real change.
    pub fn start<F, Fut>(&self, mut on_change: F) -> JoinHandle<()>
    where
        F: FnMut(Options) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut sub = self.bus.subscribe(TOPIC_OPTIONS, self.context);
        let current = self.current.clone();
        let context = self.context;
        tokio::spawn(async move {
            while let Some(payload) = sub.recv().await {
                let Some(incoming) = Options::from_value(&payload) else {
                    tracing::warn!(%context, "ignoring unreadable options message");
                    continue;
                };
                if swap_if_changed(&current, incoming) {
                    tracing::debug!(%context, "options changed elsewhere");
                    on_change(incoming).await;
                }
            }
            tracing::debug!(%context, "options listener stopped");
        })
    }

    /// Persists and broadcasts `options`. Publishing the current value does nothing.
    pub async fn publish(&self, options: Options) -> Result<bool> {
        if self.current() == options {
            return Ok(false);
        }
        options.store(self.kv.as_ref()).await?;
        swap_if_changed(&self.current, options);
        self.bus
            .publish(TOPIC_OPTIONS, serde_json::to_value(options)?, self.context);
        Ok(true)
    }
}

/// A subscription that can be switched on and off.
#[async_trait]
pub trait Toggle: Send + Sync {
    async fn install(&self) -> Result<()>;
    async fn uninstall(&self) -> Result<()>;
}

struct Gate {
    toggle: Box<dyn Toggle>,
    active: bool,
}

/// Named subscriptions each gated by a boolean.
///
/// `set` is idempotent: installing happens only on an off to on transition and
/// uninstalling only on on to off, whatever the sequence of calls.
#[derive(Default)]
pub struct SubscriptionRegistry {
    gates: tokio::sync::Mutex<BTreeMap<String, Gate>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an inactive subscription, replacing one of the same name.
    pub async fn register(&self, name: &str, toggle: Box<dyn Toggle>) {
        self.gates.lock().await.insert(
            name.to_string(),
            Gate {
                toggle,
                active: false,
            },
        );
    }

    /// Returns whether anything was installed or uninstalled.
    pub async fn set(&self, name: &str, on: bool) -> Result<bool> {
        let mut gates = self.gates.lock().await;
        let gate = gates
            .get_mut(name)
            .ok_or_else(|| PinError::Validation(format!("no subscription named {name}")))?;
        if gate.active == on {
            return Ok(false);
        }
        if on {
            gate.toggle.install().await?;
        } else {
            gate.toggle.uninstall().await?;
        }
        gate.active = on;
        tracing::info!(%name, on, "subscription toggled");
        Ok(true)
    }

    pub async fn is_active(&self, name: &str) -> bool {
        self.gates
            .lock()
            .await
            .get(name)
            .is_some_and(|g| g.active)
    }
}
