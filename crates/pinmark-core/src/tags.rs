//! Cached tag vocabulary with usage counts.
//!
//! Reads are served from the local store and refreshed from the remote in the
//! background once the snapshot is older than the ttl. Saves and deletes patch
//! the persisted snapshot in place, so a concurrent background refresh and a
//! local merge simply race and the last write wins.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::kv::{KvStore, KEY_TAGS, KEY_TOKEN};
use crate::remote::RemoteBookmarkStore;
use crate::Tag;

pub const DEFAULT_TTL: std::time::Duration = std::time::Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFrequencyTable {
    pub tags: BTreeMap<Tag, u64>,
    #[serde(rename = "capturedAt", with = "unix_ms")]
    pub captured_at: OffsetDateTime,
}

mod unix_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(t: &OffsetDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64((t.unix_timestamp_nanos() / 1_000_000) as i64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<OffsetDateTime, D::Error> {
        let ms = i64::deserialize(d)?;
        OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
            .map_err(serde::de::Error::custom)
    }
}

impl TagFrequencyTable {
    pub fn new(tags: BTreeMap<Tag, u64>, captured_at: OffsetDateTime) -> Self {
        Self { tags, captured_at }
    }

    /// An empty table that any read will consider stale.
    pub fn empty() -> Self {
        Self::new(BTreeMap::new(), OffsetDateTime::UNIX_EPOCH)
    }

    pub fn count(&self, tag: &str) -> u64 {
        self.tags.get(tag).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Older than `ttl`, or captured in the future (clock skew).
    pub fn is_stale(&self, now: OffsetDateTime, ttl: time::Duration) -> bool {
        self.captured_at > now || now - self.captured_at > ttl
    }

    /// Counts up tags only in `added`, counts down tags only in `removed`.
    /// Entries reaching zero are dropped. Returns whether anything changed.
    pub fn apply_delta(&mut self, added: &[Tag], removed: &[Tag]) -> bool {
        let added: BTreeSet<&str> = added.iter().map(String::as_str).collect();
        let removed: BTreeSet<&str> = removed.iter().map(String::as_str).collect();
        let mut changed = false;
        for tag in added.difference(&removed) {
            *self.tags.entry(tag.to_string()).or_insert(0) += 1;
            changed = true;
        }
        for tag in removed.difference(&added) {
            match self.tags.get(*tag).copied() {
                Some(n) if n > 1 => {
                    self.tags.insert(tag.to_string(), n - 1);
                }
                Some(_) => {
                    self.tags.remove(*tag);
                }
                None => continue,
            }
            changed = true;
        }
        changed
    }
}

fn parse_snapshot(v: serde_json::Value) -> Option<TagFrequencyTable> {
    match serde_json::from_value::<TagFrequencyTable>(v) {
        Ok(t) => Some(t),
        Err(e) => {
            tracing::debug!("unrecognized tag snapshot: {e}");
            None
        }
    }
}

async fn fetch_and_store(
    kv: &dyn KvStore,
    remote: &dyn RemoteBookmarkStore,
) -> Result<TagFrequencyTable> {
    let tags = remote.all_tags().await?;
    let table = TagFrequencyTable::new(tags, OffsetDateTime::now_utc());
    kv.set(&[(KEY_TAGS, serde_json::to_value(&table)?)]).await?;
    Ok(table)
}

pub struct TagFrequencyCache {
    kv: Arc<dyn KvStore>,
    remote: Arc<dyn RemoteBookmarkStore>,
    ttl: time::Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl TagFrequencyCache {
    pub fn new(kv: Arc<dyn KvStore>, remote: Arc<dyn RemoteBookmarkStore>) -> Self {
        Self::with_ttl(kv, remote, DEFAULT_TTL)
    }

    pub fn with_ttl(
        kv: Arc<dyn KvStore>,
        remote: Arc<dyn RemoteBookmarkStore>,
        ttl: std::time::Duration,
    ) -> Self {
        Self {
            kv,
            remote,
            ttl: time::Duration::new(ttl.as_secs() as i64, ttl.subsec_nanos() as i32),
            pending: Mutex::new(None),
        }
    }

    /// Current snapshot. Fetches in the foreground only when there is nothing usable stored.
    pub async fn read(&self) -> Result<TagFrequencyTable> {
        let stored = self.kv.get(KEY_TAGS).await?.and_then(parse_snapshot);
        let Some(table) = stored else {
            tracing::debug!("no usable tag snapshot, fetching vocabulary");
            return self.refresh().await;
        };
        if table.is_stale(OffsetDateTime::now_utc(), self.ttl) {
            self.refresh_in_background();
        }
        Ok(table)
    }

    /// Fetches the full vocabulary and replaces the snapshot.
    pub async fn refresh(&self) -> Result<TagFrequencyTable> {
        fetch_and_store(self.kv.as_ref(), self.remote.as_ref()).await
    }

    fn refresh_in_background(&self) {
        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        if pending.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::debug!("tag refresh already running");
            return;
        }
        tracing::debug!("tag snapshot stale, refreshing in background");
        let kv = self.kv.clone();
        let remote = self.remote.clone();
        *pending = Some(tokio::spawn(async move {
            match fetch_and_store(kv.as_ref(), remote.as_ref()).await {
                Ok(t) => tracing::debug!(tags = t.len(), "background tag refresh stored"),
                Err(e) => tracing::warn!("background tag refresh failed: {e}"),
            }
        }));
    }

    /// Waits for a background refresh started by an earlier read, if any.
    pub async fn settle(&self) {
        let handle = match self.pending.lock() {
            Ok(mut pending) => pending.take(),
            Err(_) => None,
        };
        if let Some(h) = handle {
            if let Err(e) = h.await {
                tracing::warn!("background tag refresh aborted: {e}");
            }
        }
    }

    /// Drops the credential together with the vocabulary it was fetched with.
    pub async fn forget(&self) -> Result<()> {
        self.kv.remove(&[KEY_TOKEN, KEY_TAGS]).await
    }

    /// Applies a local usage delta to the persisted snapshot (read, then write).
    pub async fn merge(&self, added: &[Tag], removed: &[Tag]) -> Result<TagFrequencyTable> {
        let mut table = self
            .kv
            .get(KEY_TAGS)
            .await?
            .and_then(parse_snapshot)
            .unwrap_or_else(TagFrequencyTable::empty);
        if table.apply_delta(added, removed) {
            self.kv
                .set(&[(KEY_TAGS, serde_json::to_value(&table)?)])
                .await?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(pairs: &[(&str, u64)]) -> TagFrequencyTable {
        TagFrequencyTable::new(
            pairs.iter().map(|(t, n)| (t.to_string(), *n)).collect(),
            OffsetDateTime::now_utc(),
        )
    }

    fn tags(list: &[&str]) -> Vec<Tag> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn delta_counts_up_and_down() {
        let mut t = table(&[("a", 1), ("b", 2), ("c", 5)]);
        assert!(t.apply_delta(&tags(&["a", "new"]), &tags(&["b", "a"])));
        // "a" is in both deltas and is left alone
        assert_eq!(t.count("a"), 1);
        assert_eq!(t.count("b"), 1);
        assert_eq!(t.count("c"), 5);
        assert_eq!(t.count("new"), 1);
    }

    #[test]
    fn zero_counts_are_removed() {
        let mut t = table(&[("gone", 1)]);
        t.apply_delta(&[], &tags(&["gone", "never-there"]));
        assert!(!t.tags.contains_key("gone"));
        assert!(t.is_empty());
    }

    #[test]
    fn duplicate_tags_count_once() {
        let mut t = table(&[]);
        t.apply_delta(&tags(&["x", "x"]), &[]);
        assert_eq!(t.count("x"), 1);
    }

    #[test]
    fn staleness_includes_future_capture() {
        let now = OffsetDateTime::now_utc();
        let ttl = time::Duration::hours(1);
        let mut t = table(&[]);
        t.captured_at = now - time::Duration::minutes(30);
        assert!(!t.is_stale(now, ttl));
        t.captured_at = now - ttl - time::Duration::milliseconds(1);
        assert!(t.is_stale(now, ttl));
        t.captured_at = now + time::Duration::minutes(1);
        assert!(t.is_stale(now, ttl));
    }

    #[test]
    fn snapshot_uses_captured_at_millis() {
        let t = TagFrequencyTable::new(
            BTreeMap::from([("rust".to_string(), 3)]),
            OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
        );
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["capturedAt"], 1_700_000_000_000i64);
        assert_eq!(v["tags"]["rust"], 3);
    }
}
