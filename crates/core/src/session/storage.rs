//! Persisted session record storage
//!
//! One JSON blob under one well-known key. Every execution context
//! ("tab") reading the same persisted key sees the same record, which is
//! what makes cross-tab logout observable.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;

use crate::error::Result;

/// Key/value persistence for the session blob.
pub trait SessionStorage: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, value: &str) -> Result<()>;
    fn clear(&self, key: &str) -> Result<()>;
}

/// In-memory storage. Cloning shares the underlying map, so two stores
/// built over clones behave like two tabs over the same browser storage.
#[derive(Clone, Default)]
pub struct MemorySessionStorage {
    records: Arc<Mutex<HashMap<String, String>>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.records.lock().unwrap().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.records.lock().unwrap().remove(key);
        Ok(())
    }
}

/// SQLite-backed storage: a single key/value row per session key.
pub struct SqliteSessionStorage {
    conn: Mutex<Connection>,
}

impl SqliteSessionStorage {
    /// Open or create storage at the given path.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open in-memory storage (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open storage at the platform-default location.
    pub fn open_default() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("com", "homesense", "homesense")
            .ok_or_else(|| crate::error::Error::InvalidOperation("no home directory".into()))?;
        std::fs::create_dir_all(dirs.data_dir())?;
        Self::open(dirs.data_dir().join("session.db"))
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS session_record (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )?;
        Ok(())
    }
}

impl SessionStorage for SqliteSessionStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM session_record WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO session_record (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM session_record WHERE key = ?1", params![key])?;
        Ok(())
    }
}
