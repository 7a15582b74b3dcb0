//! Local key-value storage shared by all contexts on one machine.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{PinError, Result};

pub const KEY_OPTIONS: &str = "options";
pub const KEY_TOKEN: &str = "token";
pub const KEY_TAGS: &str = "tags";

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn get_many(&self, keys: &[&str]) -> Result<BTreeMap<String, Value>> {
        let mut out = BTreeMap::new();
        for key in keys {
            if let Some(v) = self.get(key).await? {
                out.insert(key.to_string(), v);
            }
        }
        Ok(out)
    }

    /// Writes every entry; existing keys are replaced wholesale.
    async fn set(&self, entries: &[(&str, Value)]) -> Result<()>;

    /// Removing an absent key is not an error.
    async fn remove(&self, keys: &[&str]) -> Result<()>;
}

/// In-process store for tests and contexts without a database.
#[derive(Default)]
pub struct MemKvStore {
    inner: RwLock<BTreeMap<String, Value>>,
}

impl MemKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> PinError {
    PinError::Storage("memory store lock poisoned".into())
}

#[async_trait]
impl KvStore for MemKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let map = self.inner.read().map_err(poisoned)?;
        Ok(map.get(key).cloned())
    }

    async fn set(&self, entries: &[(&str, Value)]) -> Result<()> {
        let mut map = self.inner.write().map_err(poisoned)?;
        for (k, v) in entries {
            map.insert(k.to_string(), v.clone());
        }
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut map = self.inner.write().map_err(poisoned)?;
        for k in keys {
            map.remove(*k);
        }
        Ok(())
    }
}

#[cfg(feature = "sqlite")]
mod sqlite_kv {
    use super::*;
    use include_dir::{include_dir, Dir};
    use rusqlite::{params, Connection, OptionalExtension};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use time::OffsetDateTime;

    static MIGRATIONS: Dir = include_dir!("$CARGO_MANIFEST_DIR/migrations");

    /// SQLite-backed store; one file is shared by the CLI and `watchd`.
    pub struct SqliteKvStore {
        path: PathBuf,
        conn: Mutex<Connection>,
    }

    impl SqliteKvStore {
        pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
            let path = path.as_ref().to_path_buf();
            if let Some(dir) = path.parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir)
                        .map_err(|e| PinError::Storage(format!("{}: {e}", dir.display())))?;
                }
            }
            let conn = Connection::open(&path)?;
            let _ = conn.pragma_update(None, "journal_mode", "WAL");
            let _ = conn.busy_timeout(std::time::Duration::from_millis(5000));
            Self::run_migrations(&conn)?;
            Ok(Self {
                path,
                conn: Mutex::new(conn),
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        fn run_migrations(conn: &Connection) -> Result<()> {
            let current: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
            let mut files: Vec<_> = MIGRATIONS
                .files()
                .filter(|f| f.path().extension().map(|e| e == "sql").unwrap_or(false))
                .collect();
            files.sort_by_key(|f| f.path().to_path_buf());
            for file in files {
                let name = file
                    .path()
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                let ver = crate::parse_version_prefix(&name).unwrap_or(0) as i64;
                if ver <= current {
                    continue;
                }
                let sql = file.contents_utf8().ok_or_else(|| {
                    PinError::Storage(format!("invalid utf-8 in migration {name}"))
                })?;
                let tx = conn.unchecked_transaction()?;
                tx.execute_batch(sql)?;
                tx.execute(&format!("PRAGMA user_version = {}", ver), [])?;
                tx.commit()?;
                tracing::debug!(migration = %name, "applied kv migration");
            }
            Ok(())
        }

        fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
            self.conn
                .lock()
                .map_err(|_| PinError::Storage("sqlite connection lock poisoned".into()))
        }
    }

    #[async_trait]
    impl KvStore for SqliteKvStore {
        async fn get(&self, key: &str) -> Result<Option<Value>> {
            let conn = self.lock()?;
            let raw: Option<String> = conn
                .query_row("SELECT value FROM kv WHERE key = ?", [key], |r| r.get(0))
                .optional()?;
            match raw {
                Some(s) => Ok(Some(serde_json::from_str(&s)?)),
                None => Ok(None),
            }
        }

        async fn set(&self, entries: &[(&str, Value)]) -> Result<()> {
            let now = OffsetDateTime::now_utc().unix_timestamp();
            let conn = self.lock()?;
            let tx = conn.unchecked_transaction()?;
            for (k, v) in entries {
                tx.execute(
                    "INSERT INTO kv(key, value, updated_at) VALUES(?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    params![k, serde_json::to_string(v)?, now],
                )?;
            }
            tx.commit()?;
            Ok(())
        }

        async fn remove(&self, keys: &[&str]) -> Result<()> {
            let conn = self.lock()?;
            let tx = conn.unchecked_transaction()?;
            for k in keys {
                tx.execute("DELETE FROM kv WHERE key = ?", [k])?;
            }
            tx.commit()?;
            Ok(())
        }
    }
}

#[cfg(feature = "sqlite")]
pub use sqlite_kv::SqliteKvStore;
