//! Login, lookup, save and delete as the popup runs them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::complete::toggle_tags;
use crate::error::{PinError, Result};
use crate::kv::{KvStore, KEY_TOKEN};
use crate::options::Options;
use crate::post::{blockquote, split_tags, Post};
use crate::reconcile::TabStateReconciler;
use crate::remote::RemoteBookmarkStore;
use crate::tags::TagFrequencyCache;
use crate::Tag;

/// What the save dialog shows for one url.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostForm {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    /// Space separated; a trailing space when loaded so typing starts a new tag.
    pub tags: String,
    pub unshared: bool,
    pub toread: bool,
    /// Already bookmarked; saving replaces it.
    pub update: bool,
    /// Keep an existing bookmark instead of replacing it.
    #[serde(default)]
    pub no_overwrite: bool,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub time: Option<OffsetDateTime>,
    /// Suggestions from the user's own tags.
    #[serde(default)]
    pub suggested: Vec<Tag>,
    /// Tags other people use for this url.
    #[serde(default)]
    pub popular: Vec<Tag>,
    /// From the page's `keywords` meta tag.
    #[serde(default)]
    pub keywords: Vec<Tag>,
}

impl PostForm {
    /// Adds the page keywords to the tags, or takes them all out again when already there.
    pub fn toggle_keywords(&mut self) {
        if !self.keywords.is_empty() {
            self.tags = toggle_tags(&self.tags, &self.keywords);
        }
    }

    pub fn to_post(&self) -> Post {
        Post {
            url: self.url.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            unshared: self.unshared,
            toread: self.toread,
            no_overwrite: self.no_overwrite,
        }
    }
}

/// Tags from a `keywords` meta value: comma separated, inner spaces joined with `-`, duplicates dropped.
pub fn page_keywords(raw: Option<&str>) -> Vec<Tag> {
    let mut out: Vec<Tag> = Vec::new();
    for word in raw.unwrap_or_default().split(',') {
        let tag = word.split_whitespace().collect::<Vec<_>>().join("-");
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// Description taken from the page, quoted when the `blockquote` option is on.
pub fn page_description(raw: Option<&str>, options: &Options) -> Option<String> {
    let raw = raw.filter(|d| !d.is_empty())?;
    Some(if options.blockquote {
        blockquote(raw)
    } else {
        raw.to_string()
    })
}

fn split_token(token: &str) -> Option<(&str, &str)> {
    token
        .split_once(':')
        .filter(|(user, secret)| !user.is_empty() && !secret.is_empty())
}

pub struct Bookmarks {
    kv: Arc<dyn KvStore>,
    remote: Arc<dyn RemoteBookmarkStore>,
    cache: Arc<TagFrequencyCache>,
    reconciler: Option<Arc<TabStateReconciler>>,
}

impl Bookmarks {
    pub fn new(
        kv: Arc<dyn KvStore>,
        remote: Arc<dyn RemoteBookmarkStore>,
        cache: Arc<TagFrequencyCache>,
    ) -> Self {
        Self {
            kv,
            remote,
            cache,
            reconciler: None,
        }
    }

    /// Also keep tab indicators in step with saves and deletes.
    pub fn with_reconciler(mut self, reconciler: Arc<TabStateReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn cache(&self) -> &TagFrequencyCache {
        &self.cache
    }

    /// Verifies and stores a `user:SECRET` token. Returns the user name.
    pub async fn login(&self, token: &str) -> Result<String> {
        let token = token.trim();
        let Some((user, _)) = split_token(token) else {
            return Err(PinError::Validation(
                "token must look like user:SECRET".into(),
            ));
        };
        if !self.remote.verify_token(token).await? {
            return Err(PinError::Refused("token not accepted".into()));
        }
        self.kv.set(&[(KEY_TOKEN, Value::String(token.to_string()))]).await?;
        tracing::info!(%user, "logged in");
        Ok(user.to_string())
    }

    pub async fn logout(&self) -> Result<()> {
        self.cache.forget().await
    }

    pub async fn user_name(&self) -> Result<Option<String>> {
        Ok(match self.kv.get(KEY_TOKEN).await? {
            Some(Value::String(t)) => split_token(&t).map(|(u, _)| u.to_string()),
            _ => None,
        })
    }

    /// The saved bookmark for `url` (or a fresh form) plus tag suggestions.
    pub async fn lookup(&self, url: &str, options: &Options) -> Result<PostForm> {
        let (found, suggestions) =
            tokio::try_join!(self.remote.get(url), self.remote.suggest(url))?;
        let mut form = PostForm {
            url: url.to_string(),
            unshared: options.unshared,
            toread: options.toread,
            suggested: suggestions.recommended,
            popular: suggestions.popular,
            ..PostForm::default()
        };
        if let Some(post) = found {
            form.url = post.url;
            form.title = post.title;
            form.description = post.description;
            form.tags = match post.tags.trim() {
                "" => String::new(),
                t => format!("{t} "),
            };
            form.unshared = post.unshared;
            form.toread = post.toread;
            form.time = post.time;
            form.update = true;
            if let Some(r) = &self.reconciler {
                r.mark(&form.url, true).await;
            }
        }
        Ok(form)
    }

    /// Saves the form and counts its tags against `previous_tags`.
    pub async fn save(&self, form: &PostForm, previous_tags: &str) -> Result<Post> {
        let post = form.to_post().normalized()?;
        self.remote.save(&post).await?;
        if let Err(e) = self
            .cache
            .merge(&post.tag_list(), &split_tags(previous_tags))
            .await
        {
            tracing::warn!("saved, but the tag cache was not updated: {e}");
        }
        if let Some(r) = &self.reconciler {
            r.after_save(&post.url).await;
        }
        Ok(post)
    }

    /// Deletes the bookmark. Indicators go to "not bookmarked" even when the delete fails.
    pub async fn delete(&self, url: &str, previous_tags: &str) -> Result<()> {
        let result = self.remote.delete(url).await;
        if result.is_ok() {
            if let Err(e) = self.cache.merge(&[], &split_tags(previous_tags)).await {
                tracing::warn!("deleted, but the tag cache was not updated: {e}");
            }
        }
        if let Some(r) = &self.reconciler {
            r.after_delete(url).await;
        }
        result
    }
}
