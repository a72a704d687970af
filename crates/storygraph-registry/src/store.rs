//! Registry storage: trait and in-memory implementation.
//!
//! The backing store is a flat table keyed by normalized name. It only needs
//! insert-or-ignore, a first-writer-wins description update and point
//! lookups; the unique key is what makes concurrent inserts converge.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Errors that can occur during registry storage operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry storage error: {0}")]
    Storage(String),

    #[error("Registry store lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for RegistryError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// One canonical name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Normalized name; the unique key.
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RegistryEntry {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            name: name.into(),
            description,
            created_at: Utc::now(),
        }
    }
}

/// Trait for registry persistence backends.
pub trait RegistryStore: Send + Sync {
    /// All entries in insertion order.
    fn load_all(&self) -> Result<Vec<RegistryEntry>>;

    /// Insert unless an entry with the same name exists.
    /// Returns `true` if a row was inserted.
    fn insert_if_absent(&self, entry: &RegistryEntry) -> Result<bool>;

    /// Set the description only if the entry has none yet.
    /// Returns `true` if the description was attached.
    fn attach_description(&self, name: &str, description: &str) -> Result<bool>;

    /// Point lookup by normalized name.
    fn get(&self, name: &str) -> Result<Option<RegistryEntry>>;
}

/// Volatile store for tests and one-shot runs.
#[derive(Default)]
pub struct MemoryRegistryStore {
    inner: Mutex<MemoryTable>,
}

#[derive(Default)]
struct MemoryTable {
    rows: Vec<RegistryEntry>,
    index: HashMap<String, usize>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with entries, as if loaded from disk.
    pub fn with_entries(entries: impl IntoIterator<Item = RegistryEntry>) -> Self {
        let store = Self::new();
        if let Ok(mut table) = store.inner.lock() {
            for entry in entries {
                if !table.index.contains_key(&entry.name) {
                    let pos = table.rows.len();
                    table.index.insert(entry.name.clone(), pos);
                    table.rows.push(entry);
                }
            }
        }
        store
    }
}

impl RegistryStore for MemoryRegistryStore {
    fn load_all(&self) -> Result<Vec<RegistryEntry>> {
        let table = self.inner.lock().map_err(|_| RegistryError::Poisoned)?;
        Ok(table.rows.clone())
    }

    fn insert_if_absent(&self, entry: &RegistryEntry) -> Result<bool> {
        let mut table = self.inner.lock().map_err(|_| RegistryError::Poisoned)?;
        if table.index.contains_key(&entry.name) {
            return Ok(false);
        }
        let pos = table.rows.len();
        table.index.insert(entry.name.clone(), pos);
        table.rows.push(entry.clone());
        Ok(true)
    }

    fn attach_description(&self, name: &str, description: &str) -> Result<bool> {
        let mut table = self.inner.lock().map_err(|_| RegistryError::Poisoned)?;
        let Some(&pos) = table.index.get(name) else {
            return Ok(false);
        };
        let row = &mut table.rows[pos];
        if row.description.is_some() {
            return Ok(false);
        }
        row.description = Some(description.to_string());
        Ok(true)
    }

    fn get(&self, name: &str) -> Result<Option<RegistryEntry>> {
        let table = self.inner.lock().map_err(|_| RegistryError::Poisoned)?;
        Ok(table.index.get(name).map(|&pos| table.rows[pos].clone()))
    }
}
