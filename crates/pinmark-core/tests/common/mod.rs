#![allow(dead_code)]

use async_trait::async_trait;
use pinmark_core::watcher::{MenuEntry, MenuHost};
use pinmark_core::{
    Indicator, PinError, Post, RemoteBookmarkStore, RemotePost, Result, Suggestions, TabId,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, Semaphore};

pub fn tags(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub fn remote_post(url: &str, tags: &str) -> RemotePost {
    RemotePost {
        url: url.into(),
        title: format!("title of {url}"),
        description: None,
        tags: tags.into(),
        unshared: false,
        toread: false,
        time: None,
    }
}

/// In-memory remote with switchable failures.
pub struct FakeRemote {
    pub tags: Mutex<BTreeMap<String, u64>>,
    pub posts: Mutex<BTreeMap<String, RemotePost>>,
    pub tag_calls: AtomicUsize,
    pub save_calls: AtomicUsize,
    pub fail_tags: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_delete: AtomicBool,
    pub logged_out: AtomicBool,
    /// `all_tags` waits for a permit.
    pub gate: Semaphore,
}

impl FakeRemote {
    pub fn new(tags: &[(&str, u64)]) -> Self {
        Self::with_gate(tags, Semaphore::MAX_PERMITS)
    }

    /// `all_tags` blocks until the test adds permits to `gate`.
    pub fn held(tags: &[(&str, u64)]) -> Self {
        Self::with_gate(tags, 0)
    }

    fn with_gate(tags: &[(&str, u64)], permits: usize) -> Self {
        Self {
            tags: Mutex::new(tags.iter().map(|(t, n)| (t.to_string(), *n)).collect()),
            posts: Mutex::new(BTreeMap::new()),
            tag_calls: AtomicUsize::new(0),
            save_calls: AtomicUsize::new(0),
            fail_tags: AtomicBool::new(false),
            fail_get: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            logged_out: AtomicBool::new(false),
            gate: Semaphore::new(permits),
        }
    }

    pub fn with_post(self, p: RemotePost) -> Self {
        self.posts.lock().unwrap().insert(p.url.clone(), p);
        self
    }

    fn credential(&self) -> Result<()> {
        if self.logged_out.load(Ordering::SeqCst) {
            return Err(PinError::MissingCredential);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBookmarkStore for FakeRemote {
    async fn get(&self, url: &str) -> Result<Option<RemotePost>> {
        self.credential()?;
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(PinError::Remote("connection reset".into()));
        }
        Ok(self.posts.lock().unwrap().get(url).cloned())
    }

    async fn save(&self, post: &Post) -> Result<()> {
        self.credential()?;
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        let mut saved = remote_post(&post.url, &post.tags);
        saved.title = post.title.clone();
        self.posts.lock().unwrap().insert(post.url.clone(), saved);
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<()> {
        self.credential()?;
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(PinError::Api {
                status: 500,
                message: "server error".into(),
            });
        }
        self.posts.lock().unwrap().remove(url);
        Ok(())
    }

    async fn all_tags(&self) -> Result<BTreeMap<String, u64>> {
        self.credential()?;
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await;
        if self.fail_tags.load(Ordering::SeqCst) {
            return Err(PinError::Remote("timeout".into()));
        }
        Ok(self.tags.lock().unwrap().clone())
    }

    async fn suggest(&self, _url: &str) -> Result<Suggestions> {
        self.credential()?;
        Ok(Suggestions {
            recommended: vec!["mine".into()],
            popular: vec!["theirs".into()],
        })
    }

    async fn verify_token(&self, token: &str) -> Result<bool> {
        Ok(token == "alice:SECRET")
    }
}

/// Sends every indicator change down a channel.
pub struct ChannelIndicator(pub mpsc::UnboundedSender<(TabId, bool)>);

impl ChannelIndicator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(TabId, bool)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

#[async_trait]
impl Indicator for ChannelIndicator {
    async fn set(&self, tab: TabId, bookmarked: bool) {
        let _ = self.0.send((tab, bookmarked));
    }
}

pub fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(v) = rx.try_recv() {
        out.push(v);
    }
    out
}

#[derive(Default)]
pub struct RecordingMenu {
    pub log: Mutex<Vec<String>>,
    /// Creating this entry fails.
    pub refuse: Mutex<Option<&'static str>>,
}

#[async_trait]
impl MenuHost for RecordingMenu {
    async fn create(&self, entry: &MenuEntry) -> Result<()> {
        if *self.refuse.lock().unwrap() == Some(entry.id) {
            return Err(PinError::Storage(format!("menu entry {} refused", entry.id)));
        }
        self.log.lock().unwrap().push(format!("+{}", entry.id));
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.log.lock().unwrap().push(format!("-{id}"));
        Ok(())
    }
}
