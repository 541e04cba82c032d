//! Table-query backend boundary
//!
//! The engine talks to a generic table-query service: filtered reads and
//! row writes against named tables. Filter expressions are opaque strings
//! in the backend's dialect (`field=="value" and other==true`); the engine
//! builds them but never interprets backend-side semantics. Transport
//! errors of any kind surface as [`Error::BackendUnavailable`], and no
//! response is treated the same as an explicit error.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A backend row. Tables are schemaless from the engine's point of view.
pub type Row = Value;

#[async_trait]
pub trait TableBackend: Send + Sync {
    /// Fetch rows of `table` matching `filter` (empty filter = all rows).
    async fn query(&self, table: &str, filter: &str) -> Result<Vec<Row>>;

    /// Insert a row, returning it as stored.
    async fn insert(&self, table: &str, row: Row) -> Result<Row>;

    /// Patch the row identified by the `id` field, returning the result.
    async fn patch(&self, table: &str, row: Row) -> Result<Row>;

    /// Delete the row identified by the `id` field.
    async fn delete(&self, table: &str, row: Row) -> Result<()>;
}

/// In-memory backend double.
///
/// Holds canned per-table rows, evaluates the conjunction-of-equality
/// subset of the filter dialect the engine actually emits, and records
/// every issued filter so tests can assert on query shapes. `set_offline`
/// makes every call fail like an unreachable transport.
pub struct MemoryBackend {
    tables: std::sync::Mutex<std::collections::HashMap<String, Vec<Row>>>,
    issued: std::sync::Mutex<Vec<(String, String)>>,
    offline: std::sync::atomic::AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: std::sync::Mutex::new(std::collections::HashMap::new()),
            issued: std::sync::Mutex::new(Vec::new()),
            offline: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn push(&self, table: &str, row: Row) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline
            .store(offline, std::sync::atomic::Ordering::SeqCst);
    }

    /// All `(table, filter)` pairs issued so far.
    pub fn issued_queries(&self) -> Vec<(String, String)> {
        self.issued.lock().unwrap().clone()
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(crate::error::Error::BackendUnavailable(
                "memory backend offline".into(),
            ));
        }
        Ok(())
    }

    /// Evaluate one `field==value` / `field!=value` term against a row.
    fn term_matches(row: &Row, term: &str) -> bool {
        let (field, value, negate) = if let Some((f, v)) = term.split_once("!=") {
            (f.trim(), v.trim(), true)
        } else if let Some((f, v)) = term.split_once("==") {
            (f.trim(), v.trim(), false)
        } else {
            return true;
        };

        let actual = row.get(field);
        let matches = if value == "null" {
            actual.is_none() || actual == Some(&Value::Null)
        } else if value == "true" || value == "false" {
            actual == Some(&Value::Bool(value == "true"))
        } else {
            let unquoted = value.trim_matches('"');
            actual.and_then(Value::as_str) == Some(unquoted)
        };
        matches != negate
    }

    fn filter_matches(row: &Row, filter: &str) -> bool {
        if filter.is_empty() {
            return true;
        }
        filter.split(" and ").all(|term| Self::term_matches(row, term))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TableBackend for MemoryBackend {
    async fn query(&self, table: &str, filter: &str) -> Result<Vec<Row>> {
        self.check_online()?;
        self.issued
            .lock()
            .unwrap()
            .push((table.to_string(), filter.to_string()));
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| Self::filter_matches(row, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row> {
        self.check_online()?;
        self.push(table, row.clone());
        Ok(row)
    }

    async fn patch(&self, table: &str, row: Row) -> Result<Row> {
        self.check_online()?;
        let id = row.get("id").cloned();
        let mut tables = self.tables.lock().unwrap();
        if let Some(rows) = tables.get_mut(table) {
            for existing in rows.iter_mut() {
                if existing.get("id") == id.as_ref() {
                    if let (Some(target), Some(patch)) = (existing.as_object_mut(), row.as_object())
                    {
                        for (key, value) in patch {
                            target.insert(key.clone(), value.clone());
                        }
                    }
                    return Ok(existing.clone());
                }
            }
        }
        Err(crate::error::Error::NotFound(format!(
            "no row with matching id in {table}"
        )))
    }

    async fn delete(&self, table: &str, row: Row) -> Result<()> {
        self.check_online()?;
        let id = row.get("id").cloned();
        let mut tables = self.tables.lock().unwrap();
        if let Some(rows) = tables.get_mut(table) {
            rows.retain(|existing| existing.get("id") != id.as_ref());
        }
        Ok(())
    }
}
