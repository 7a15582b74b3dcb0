//! In-process broadcast bus between contexts.
//!
//! Delivery is fire-and-forget: publishing with nobody listening is fine, and a
//! slow subscriber that lags behind loses the oldest messages.

use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Identifies one running context (popup, options page, background watcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub fn new() -> Self {
        Self(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    topic: String,
    origin: ContextId,
    payload: Value,
}

#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<Envelope>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many subscribers (of any topic) were reached.
    pub fn publish(&self, topic: &str, payload: Value, origin: ContextId) -> usize {
        let env = Envelope {
            topic: topic.to_string(),
            origin,
            payload,
        };
        match self.tx.send(env) {
            Ok(n) => n,
            Err(_) => {
                tracing::debug!(%topic, "published with no subscribers");
                0
            }
        }
    }

    /// Messages on `topic` from every context except `me`.
    pub fn subscribe(&self, topic: &str, me: ContextId) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            topic: topic.to_string(),
            me,
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(64)
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<Envelope>,
    topic: String,
    me: ContextId,
}

impl Subscription {
    /// Next payload; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            match self.rx.recv().await {
                Ok(env) if env.topic == self.topic && env.origin != self.me => {
                    return Some(env.payload)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(topic = %self.topic, skipped = n, "bus subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn own_messages_are_not_delivered_back() {
        let bus = LocalBus::default();
        let (a, b) = (ContextId::new(), ContextId::new());
        let mut sub_a = bus.subscribe("options", a);
        let mut sub_b = bus.subscribe("options", b);
        bus.publish("options", json!({"from": "a"}), a);
        bus.publish("other", json!({"from": "b"}), b);
        bus.publish("options", json!({"from": "b"}), b);
        assert_eq!(sub_b.recv().await, Some(json!({"from": "a"})));
        assert_eq!(sub_a.recv().await, Some(json!({"from": "b"})));
    }

    #[test]
    fn publish_without_listeners_is_fine() {
        let bus = LocalBus::new(4);
        assert_eq!(bus.publish("options", json!({}), ContextId::new()), 0);
    }
}
