//! pinmark-core: tag cache, option sync, bookmark state and the storage/remote traits

pub mod ago;
pub mod bookmarks;
pub mod bus;
pub mod complete;
pub mod error;
pub mod kv;
pub mod options;
pub mod post;
pub mod reconcile;
pub mod remote;
pub mod sync;
pub mod tags;
pub mod watcher;

pub use bookmarks::{Bookmarks, PostForm};
pub use bus::{ContextId, LocalBus, Subscription};
pub use complete::{match_tags, CompletionList, Debouncer, KeyOutcome, NavKey, TagEntry, MAX_COMPLETIONS};
pub use error::{PinError, Result};
pub use kv::{KvStore, MemKvStore};
pub use options::Options;
pub use post::Post;
pub use reconcile::{Indicator, NavigationEvent, TabDirectory, TabId, TabStateReconciler, TabTable};
pub use remote::{RemoteBookmarkStore, RemotePost, Suggestions};
pub use sync::{ConfigSync, SubscriptionRegistry, Toggle};
pub use tags::{TagFrequencyCache, TagFrequencyTable};
pub use watcher::{BackgroundWatcher, MenuEntry, MenuHost};

#[cfg(feature = "sqlite")]
pub use kv::SqliteKvStore;
#[cfg(feature = "pinboard")]
pub use remote::PinboardClient;

/// A short user-assigned label attached to a bookmark.
pub type Tag = String;

/// Longest tag the remote accepts, in characters.
pub const MAX_TAG_CHARS: usize = 255;
/// Most tags a single bookmark may carry.
pub const MAX_TAGS: usize = 100;

#[cfg(feature = "sqlite")]
pub(crate) fn parse_version_prefix(name: &str) -> Option<u32> {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse::<u32>().ok()
    }
}
