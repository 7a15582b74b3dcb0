// Reads the parts of the CLI's settings.toml that watchd needs, without depending on the CLI crate.
use directories::BaseDirs;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub storage: Storage,
    pub api: Api,
    pub watchd: Watchd,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Storage {
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Api {
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Watchd {
    pub port: Option<u16>,
}

pub fn config_dir() -> PathBuf {
    if let Some(bd) = BaseDirs::new() {
        bd.config_dir().join("pinmark")
    } else {
        PathBuf::from("./.config/pinmark")
    }
}

pub fn default_db_path() -> PathBuf {
    config_dir().join("db").join("pinmark.db")
}

pub fn info_path() -> PathBuf {
    config_dir().join("watchd.json")
}

pub fn load_settings() -> Settings {
    let path = config_dir().join("settings.toml");
    match std::fs::read_to_string(&path) {
        Ok(s) => toml::from_str(&s).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), "ignoring unreadable settings: {e}");
            Settings::default()
        }),
        Err(_) => Settings::default(),
    }
}
