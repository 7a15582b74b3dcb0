use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub storage: Storage,
    pub api: Api,
    pub cache: Cache,
    pub complete: Complete,
    pub watchd: Watchd,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Storage {
    /// SQLite file shared with watchd; defaults to `<config>/db/pinmark.db`
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Api {
    /// Pinboard API root (default: https://api.pinboard.in/v1/)
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Cache {
    /// Age after which the tag snapshot is refreshed in the background (default: 3600)
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Complete {
    /// Completions offered at once (default: 9)
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Watchd {
    /// Fixed port for watchd; 0 or unset lets it pick one
    pub port: Option<u16>,
}

impl Settings {
    pub fn ttl(&self) -> Duration {
        self.cache
            .ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(pinmark_core::tags::DEFAULT_TTL)
    }

    pub fn complete_limit(&self) -> usize {
        self.complete
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(pinmark_core::MAX_COMPLETIONS)
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(bd) = directories::BaseDirs::new() {
        bd.config_dir().join("pinmark")
    } else {
        PathBuf::from("./.config/pinmark")
    }
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.toml")
}

pub fn default_db_path() -> PathBuf {
    config_dir().join("db").join("pinmark.db")
}

pub fn watchd_info_path() -> PathBuf {
    config_dir().join("watchd.json")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    match std::fs::read_to_string(&path) {
        Ok(s) => toml::from_str(&s).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), "ignoring unreadable settings: {e}");
            Settings::default()
        }),
        Err(_) => Settings::default(),
    }
}
