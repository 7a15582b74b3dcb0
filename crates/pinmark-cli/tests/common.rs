#![allow(dead_code)]
use assert_cmd::Command;
use pinmark_core::{KvStore, SqliteKvStore};
use serde_json::Value;
use std::path::PathBuf;
use tempfile::TempDir;

/// Nothing listens here, so any request that slips through fails fast.
pub const DEAD_API: &str = "http://127.0.0.1:9/v1/";

pub struct TestEnv {
    _dir: TempDir,
    pub db: PathBuf,
    pub cfg: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = dir.path().join("config");
        std::fs::create_dir_all(&cfg).expect("cfg dir");
        let db = dir.path().join("pinmark.db");
        Self { _dir: dir, db, cfg }
    }

    pub fn bin(&self) -> Command {
        let mut cmd = Command::cargo_bin("pinmark").unwrap();
        cmd.env("XDG_CONFIG_HOME", &self.cfg);
        cmd.env_remove("PINMARK_API_URL");
        cmd.env_remove("PINMARK_LOG");
        cmd.arg("--db").arg(&self.db);
        cmd.arg("--api-url").arg(DEAD_API);
        cmd
    }

    /// Writes entries straight into the database, as another context would.
    pub fn seed(&self, entries: &[(&str, Value)]) {
        let store = SqliteKvStore::open(&self.db).expect("open db");
        tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(store.set(entries))
            .expect("seed");
    }

    /// A tag snapshot captured just now.
    pub fn seed_tags(&self, tags: Value) {
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        self.seed(&[("tags", serde_json::json!({"tags": tags, "capturedAt": now_ms}))]);
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
