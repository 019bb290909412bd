//! Shared SQLite handle for image records.
//!
//! One connection, guarded by a mutex, serves both the ingest loop and the
//! viewer. File databases run in WAL journal mode so a viewer read never
//! waits on a half-written insert; schema migrations run on every open.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, warn};

use nichoir_core::error::NichoirError;

use crate::migrations;

/// Milliseconds a statement waits on a locked database before failing.
const BUSY_TIMEOUT_MS: u32 = 5000;

pub struct Database {
    conn: Mutex<Connection>,
    /// `None` for in-memory databases.
    path: Option<PathBuf>,
}

impl Database {
    /// Open the database file at `path`, creating it and its parent
    /// directories if needed.
    pub fn new(path: &Path) -> Result<Self, NichoirError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(|e| {
            NichoirError::Store(format!("Cannot open database {}: {}", path.display(), e))
        })?;

        let mode = enable_wal(&conn)?;
        if mode != "wal" {
            warn!(path = %path.display(), mode = %mode, "Database did not switch to WAL");
        }
        debug!(path = %path.display(), journal_mode = %mode, "Database file opened");

        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Private in-memory database, used by tests.
    pub fn in_memory() -> Result<Self, NichoirError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| NichoirError::Store(format!("Cannot open in-memory database: {}", e)))?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, NichoirError> {
        conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)
            .map_err(|e| NichoirError::Store(format!("Cannot set busy_timeout: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
            path,
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, NichoirError>
    where
        F: FnOnce(&Connection) -> Result<T, NichoirError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| NichoirError::Store("database mutex poisoned".into()))?;
        f(&conn)
    }
}

/// Switch to WAL with NORMAL sync and return the journal mode SQLite settled on.
fn enable_wal(conn: &Connection) -> Result<String, NichoirError> {
    let mode: String = conn
        .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
        .map_err(|e| NichoirError::Store(format!("Cannot set journal_mode: {}", e)))?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(|e| NichoirError::Store(format!("Cannot set synchronous: {}", e)))?;
    Ok(mode.to_lowercase())
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}
