//! The remote bookmark service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

use crate::error::Result;
use crate::post::Post;
use crate::Tag;

/// A bookmark as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePost {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub tags: String,
    pub unshared: bool,
    pub toread: bool,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub time: Option<OffsetDateTime>,
}

/// Tags suggested for an url.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestions {
    /// Picked from the user's own vocabulary.
    pub recommended: Vec<Tag>,
    /// Used by other people for the same url.
    pub popular: Vec<Tag>,
}

#[async_trait]
pub trait RemoteBookmarkStore: Send + Sync {
    /// `None` when the url is not bookmarked.
    async fn get(&self, url: &str) -> Result<Option<RemotePost>>;
    /// Adds or replaces the bookmark for `post.url`.
    async fn save(&self, post: &Post) -> Result<()>;
    async fn delete(&self, url: &str) -> Result<()>;
    /// The whole tag vocabulary with usage counts.
    async fn all_tags(&self) -> Result<BTreeMap<Tag, u64>>;
    async fn suggest(&self, url: &str) -> Result<Suggestions>;
    /// Checks a `user:secret` token without storing it.
    async fn verify_token(&self, token: &str) -> Result<bool>;
}

#[cfg(feature = "pinboard")]
mod pinboard {
    use super::*;
    use crate::error::PinError;
    use crate::kv::{KvStore, KEY_TOKEN};
    use reqwest::{Client, StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use time::format_description::well_known::Rfc3339;

    pub const DEFAULT_API_URL: &str = "https://api.pinboard.in/v1/";

    /// Pinboard v1 API client. The token is read from local storage before each call.
    pub struct PinboardClient {
        client: Client,
        base_url: String,
        kv: Arc<dyn KvStore>,
    }

    impl PinboardClient {
        pub fn new(kv: Arc<dyn KvStore>) -> Result<Self> {
            Self::with_base_url(DEFAULT_API_URL, kv)
        }

        pub fn with_base_url(base_url: &str, kv: Arc<dyn KvStore>) -> Result<Self> {
            let base_url = base_url.trim_end_matches('/').to_string();
            if !crate::post::is_http_url(&base_url) {
                return Err(PinError::Validation(format!(
                    "API url must start with http:// or https://: {base_url}"
                )));
            }
            let client = Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .connect_timeout(std::time::Duration::from_secs(30))
                .build()?;
            Ok(Self {
                client,
                base_url,
                kv,
            })
        }

        pub fn base_url(&self) -> &str {
            &self.base_url
        }

        async fn stored_token(&self) -> Result<String> {
            match self.kv.get(KEY_TOKEN).await? {
                Some(Value::String(t)) if !t.is_empty() => Ok(t),
                _ => Err(PinError::MissingCredential),
            }
        }

        async fn call(&self, method: &str, params: &[(&str, &str)]) -> Result<Value> {
            let token = self.stored_token().await?;
            self.call_with(method, params, &token).await
        }

        async fn call_with(&self, method: &str, params: &[(&str, &str)], token: &str) -> Result<Value> {
            let url = format!("{}/{}", self.base_url, method);
            tracing::debug!(%method, "pinboard request");
            let response = self
                .client
                .get(&url)
                .query(params)
                .query(&[("auth_token", token), ("format", "json")])
                .send()
                .await?;
            match response.status() {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(PinError::Api {
                        status: response.status().as_u16(),
                        message: "authentication failed".into(),
                    });
                }
                status if !status.is_success() => {
                    return Err(PinError::Api {
                        status: status.as_u16(),
                        message: response.text().await.unwrap_or_default(),
                    });
                }
                _ => {}
            }
            Ok(response.json::<Value>().await?)
        }
    }

    fn result_code(v: &Value) -> Result<()> {
        match v.get("result_code").and_then(Value::as_str) {
            Some("done") => Ok(()),
            Some(code) => Err(PinError::Refused(code.to_string())),
            None => Err(PinError::Remote("response without result_code".into())),
        }
    }

    fn str_field(v: &Value, key: &str) -> String {
        v.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
    }

    fn parse_post(v: &Value) -> RemotePost {
        let description = str_field(v, "extended");
        RemotePost {
            url: str_field(v, "href"),
            title: str_field(v, "description"),
            description: (!description.is_empty()).then_some(description),
            tags: str_field(v, "tags"),
            unshared: str_field(v, "shared") != "yes",
            toread: str_field(v, "toread") == "yes",
            time: v
                .get("time")
                .and_then(Value::as_str)
                .and_then(|t| OffsetDateTime::parse(t, &Rfc3339).ok()),
        }
    }

    /// Counts come back as numbers or as numeric strings depending on the endpoint version.
    pub(crate) fn parse_tag_counts(v: &Value) -> Result<BTreeMap<Tag, u64>> {
        let obj = v
            .as_object()
            .ok_or_else(|| PinError::Remote("tag list is not an object".into()))?;
        let mut out = BTreeMap::new();
        for (tag, count) in obj {
            let n = match count {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse::<u64>().ok(),
                _ => None,
            };
            match n {
                Some(n) if n > 0 => {
                    out.insert(tag.clone(), n);
                }
                Some(_) => {}
                None => tracing::warn!(%tag, "ignoring tag with unreadable count"),
            }
        }
        Ok(out)
    }

    #[async_trait]
    impl RemoteBookmarkStore for PinboardClient {
        async fn get(&self, url: &str) -> Result<Option<RemotePost>> {
            let data = self.call("posts/get", &[("url", url), ("meta", "no")]).await?;
            Ok(data
                .get("posts")
                .and_then(Value::as_array)
                .and_then(|posts| posts.first())
                .map(parse_post))
        }

        async fn save(&self, post: &Post) -> Result<()> {
            let shared = if post.unshared { "no" } else { "yes" };
            let toread = if post.toread { "yes" } else { "no" };
            let mut params: Vec<(&str, &str)> =
                vec![("url", post.url.as_str()), ("description", post.title.as_str())];
            if let Some(d) = &post.description {
                params.push(("extended", d.as_str()));
            }
            if !post.tags.is_empty() {
                params.push(("tags", post.tags.as_str()));
            }
            params.push(("shared", shared));
            params.push(("toread", toread));
            if post.no_overwrite {
                params.push(("replace", "no"));
            }
            let data = self.call("posts/add", &params).await?;
            result_code(&data)
        }

        async fn delete(&self, url: &str) -> Result<()> {
            let data = self.call("posts/delete", &[("url", url)]).await?;
            result_code(&data)
        }

        async fn all_tags(&self) -> Result<BTreeMap<Tag, u64>> {
            let data = self.call("tags/get", &[]).await?;
            parse_tag_counts(&data)
        }

        async fn suggest(&self, url: &str) -> Result<Suggestions> {
            let data = self.call("posts/suggest", &[("url", url)]).await?;
            let mut out = Suggestions::default();
            let collect = |v: &Value, key: &str, into: &mut Vec<Tag>| {
                if let Some(list) = v.get(key).and_then(Value::as_array) {
                    into.extend(list.iter().filter_map(Value::as_str).map(str::to_string));
                }
            };
            // Pinboard labels the user's own tags "popular" and everyone else's "recommended".
            for entry in data.as_array().map(Vec::as_slice).unwrap_or_default() {
                collect(entry, "popular", &mut out.recommended);
                collect(entry, "recommended", &mut out.popular);
            }
            Ok(out)
        }

        async fn verify_token(&self, token: &str) -> Result<bool> {
            let Some((_, secret)) = token.split_once(':') else {
                return Ok(false);
            };
            let data = self.call_with("user/api_token", &[], token).await?;
            Ok(data.get("result").and_then(Value::as_str) == Some(secret))
        }
    }

}

#[cfg(feature = "pinboard")]
pub use pinboard::{PinboardClient, DEFAULT_API_URL};
