//! User options shared by every context.
//!
//! The stored record may be partial, come from an older version, or have been
//! through a JSON round trip that turned booleans into `null`. Reading always
//! yields a complete [`Options`] with each missing or unusable field replaced by
//! its default, so two contexts comparing options never disagree because of
//! how the value was serialized.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PinError, Result};
use crate::kv::{KvStore, KEY_OPTIONS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawOptions")]
pub struct Options {
    /// Check whether visited pages are bookmarked.
    pub ping: bool,
    /// Save as private by default.
    pub unshared: bool,
    /// Save as "to read" by default.
    pub toread: bool,
    /// Use the page's meta description.
    pub meta: bool,
    /// Use the selected text as description.
    pub selection: bool,
    /// Wrap the description in a block quote.
    pub blockquote: bool,
    /// Sort tag completions alphabetically instead of by frequency.
    pub alpha: bool,
    /// Show popular tags.
    pub popular: bool,
    /// Add entries to the context menu.
    pub menu: bool,
    /// Dark mode; `None` follows the system preference.
    pub dark: Option<bool>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ping: false,
            unshared: false,
            toread: false,
            meta: true,
            selection: true,
            blockquote: false,
            alpha: false,
            popular: true,
            menu: false,
            dark: None,
        }
    }
}

pub const OPTION_KEYS: [&str; 10] = [
    "ping",
    "unshared",
    "toread",
    "meta",
    "selection",
    "blockquote",
    "alpha",
    "popular",
    "menu",
    "dark",
];

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawOptions {
    ping: Option<Value>,
    unshared: Option<Value>,
    toread: Option<Value>,
    meta: Option<Value>,
    selection: Option<Value>,
    blockquote: Option<Value>,
    alpha: Option<Value>,
    popular: Option<Value>,
    menu: Option<Value>,
    dark: Option<Value>,
}

impl From<RawOptions> for Options {
    fn from(raw: RawOptions) -> Self {
        let d = Options::default();
        Options {
            ping: flag(raw.ping, d.ping),
            unshared: flag(raw.unshared, d.unshared),
            toread: flag(raw.toread, d.toread),
            meta: flag(raw.meta, d.meta),
            selection: flag(raw.selection, d.selection),
            blockquote: flag(raw.blockquote, d.blockquote),
            alpha: flag(raw.alpha, d.alpha),
            popular: flag(raw.popular, d.popular),
            menu: flag(raw.menu, d.menu),
            dark: match raw.dark {
                None | Some(Value::Null) => d.dark,
                Some(v) => Some(truthy(&v)),
            },
        }
    }
}

fn flag(v: Option<Value>, default: bool) -> bool {
    match v {
        None | Some(Value::Null) => default,
        Some(v) => truthy(&v),
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn parse_flag(key: &str, value: &str) -> Result<Option<bool>> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(Some(true)),
        "false" | "no" | "off" | "0" => Ok(Some(false)),
        "null" | "auto" | "" => Ok(None),
        other => Err(PinError::Validation(format!(
            "option {key}: expected a boolean, got {other:?}"
        ))),
    }
}

impl Options {
    /// Reads an options record, filling gaps with defaults. `None` unless `value` is an object.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        serde_json::from_value::<Options>(value.clone()).ok()
    }

    /// Reads the stored options; absent or unreadable means defaults.
    pub async fn load(kv: &dyn KvStore) -> Result<Self> {
        Ok(match kv.get(KEY_OPTIONS).await? {
            Some(v) => Options::from_value(&v).unwrap_or_else(|| {
                tracing::warn!("unreadable options record, using defaults");
                Options::default()
            }),
            None => Options::default(),
        })
    }

    pub async fn store(&self, kv: &dyn KvStore) -> Result<()> {
        kv.set(&[(KEY_OPTIONS, serde_json::to_value(self)?)]).await
    }

    /// Sets one field from its textual form (`ping=true`, `dark=auto`).
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<()> {
        let parsed = parse_flag(key, value)?;
        if key == "dark" {
            self.dark = parsed;
            return Ok(());
        }
        let Some(on) = parsed else {
            return Err(PinError::Validation(format!(
                "option {key} cannot be unset"
            )));
        };
        let slot = match key {
            "ping" => &mut self.ping,
            "unshared" => &mut self.unshared,
            "toread" => &mut self.toread,
            "meta" => &mut self.meta,
            "selection" => &mut self.selection,
            "blockquote" => &mut self.blockquote,
            "alpha" => &mut self.alpha,
            "popular" => &mut self.popular,
            "menu" => &mut self.menu,
            _ => return Err(PinError::Validation(format!("unknown option {key}"))),
        };
        *slot = on;
        Ok(())
    }

    /// Whether to render dark, given the system preference.
    pub fn dark_mode(&self, system_prefers_dark: bool) -> bool {
        self.dark == Some(true) || (self.dark != Some(false) && system_prefers_dark)
    }

    /// Completions are ordered by frequency unless alphabetical order was asked for.
    pub fn sort_by_frequency(&self) -> bool {
        !self.alpha
    }
}
