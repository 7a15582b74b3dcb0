use serde::{Deserialize, Serialize};

use crate::error::{PinError, Result};
use crate::{Tag, MAX_TAGS, MAX_TAG_CHARS};

/// Longest description the remote stores.
pub const MAX_DESCRIPTION_CHARS: usize = 64000;

const BLOCKQUOTE_OPEN: &str = "<blockquote>";
const BLOCKQUOTE_CLOSE: &str = "</blockquote>";

/// A bookmark as sent to the remote store. Built per save, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    /// Space separated, already normalized.
    pub tags: String,
    pub unshared: bool,
    pub toread: bool,
    /// Ask the remote not to replace an existing bookmark (link capture).
    #[serde(default)]
    pub no_overwrite: bool,
}

impl Post {
    /// Trims and bounds every field; rejects a post with no url/title or an url without scheme.
    pub fn normalized(mut self) -> Result<Self> {
        self.url = self.url.trim().to_string();
        self.title = self.title.trim().to_string();
        if self.url.is_empty() {
            return Err(PinError::Validation("url is required".into()));
        }
        if !has_scheme(&self.url) {
            return Err(PinError::Validation(format!("url has no scheme: {}", self.url)));
        }
        if self.title.is_empty() {
            return Err(PinError::Validation("title is required".into()));
        }
        self.description = self
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.tags = normalize_tags(&self.tags).join(" ");
        Ok(self)
    }

    pub fn tag_list(&self) -> Vec<Tag> {
        split_tags(&self.tags)
    }
}

/// Splits on spaces, dropping empty words.
pub fn split_tags(tags: &str) -> Vec<Tag> {
    tags.split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// At most [`MAX_TAGS`] tags of at most [`MAX_TAG_CHARS`] characters each.
pub fn normalize_tags(tags: &str) -> Vec<Tag> {
    tags.split(' ')
        .filter(|t| !t.is_empty())
        .take(MAX_TAGS)
        .map(|t| t.chars().take(MAX_TAG_CHARS).collect())
        .collect()
}

/// `scheme:` per RFC 3986: a letter followed by letters, digits, `+`, `-` or `.`.
pub fn has_scheme(url: &str) -> bool {
    let Some((scheme, _)) = url.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

pub fn is_http_url(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Wraps a page description so the whole quote still fits the remote's limit.
pub fn blockquote(description: &str) -> String {
    let room = MAX_DESCRIPTION_CHARS - BLOCKQUOTE_OPEN.len() - BLOCKQUOTE_CLOSE.len();
    let body: String = description.chars().take(room).collect();
    format!("{BLOCKQUOTE_OPEN}{body}{BLOCKQUOTE_CLOSE}")
}
