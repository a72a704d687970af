//! SQLite-backed registry store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::store::{RegistryEntry, RegistryError, RegistryStore, Result};

/// Registry table in a single SQLite file.
///
/// ```text
/// entities(id INTEGER PRIMARY KEY, name TEXT UNIQUE, description TEXT, created_at TEXT)
/// ```
///
/// The connection sits behind a `Mutex`; WAL mode and `busy_timeout` let
/// several processes share the file.
pub struct SqliteRegistryStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteRegistryStore {
    /// Open (or create) the registry database at `db_path`.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = Connection::open(&db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        store.initialize()?;
        Ok(store)
    }

    /// In-memory database, mostly for tests.
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RegistryError::Poisoned)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "busy_timeout", "5000");

        conn.execute(
            "CREATE TABLE IF NOT EXISTS entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT
            )",
            [],
        )?;

        // Databases created before timestamps were tracked lack the column.
        let has_created_at = conn
            .prepare("SELECT 1 FROM pragma_table_info('entities') WHERE name = 'created_at'")?
            .exists([])?;
        if !has_created_at {
            conn.execute(
                "ALTER TABLE entities ADD COLUMN created_at TEXT NOT NULL DEFAULT ''",
                [],
            )?;
        }

        tracing::debug!(path = ?self.db_path, "Registry schema ready");
        Ok(())
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<RegistryEntry> {
    let created_raw: String = row.get(2)?;
    let created_at = DateTime::parse_from_rfc3339(&created_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    Ok(RegistryEntry {
        name: row.get(0)?,
        description: row.get(1)?,
        created_at,
    })
}

impl RegistryStore for SqliteRegistryStore {
    fn load_all(&self) -> Result<Vec<RegistryEntry>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT name, description, created_at FROM entities ORDER BY id")?;
        let rows = stmt.query_map([], row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn insert_if_absent(&self, entry: &RegistryEntry) -> Result<bool> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO entities (name, description, created_at) VALUES (?1, ?2, ?3)",
            params![entry.name, entry.description, entry.created_at.to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    fn attach_description(&self, name: &str, description: &str) -> Result<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE entities SET description = ?2
             WHERE name = ?1 AND (description IS NULL OR description = '')",
            params![name, description],
        )?;
        Ok(updated > 0)
    }

    fn get(&self, name: &str) -> Result<Option<RegistryEntry>> {
        let conn = self.lock()?;
        let entry = conn
            .query_row(
                "SELECT name, description, created_at FROM entities WHERE name = ?1",
                params![name],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }
}
