//! Database connection management.
//!
//! File-backed databases open a fresh connection for every operation and
//! close it afterwards; the file itself is the only shared state. The
//! in-memory variant used by tests keeps one connection behind a Mutex,
//! since an in-memory database disappears with its connection.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info};

use parley_core::error::ParleyError;

use crate::migrations;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

enum Target {
    File(PathBuf),
    Memory(Mutex<Connection>),
}

/// SQLite database handle shared by all request handlers.
pub struct Database {
    target: Target,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Switches the file to WAL mode and runs all pending migrations. The
    /// setup connection is closed before returning.
    pub fn new(path: &Path) -> Result<Self, ParleyError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = open_file(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(|e| ParleyError::Storage(format!("Failed to set pragmas: {}", e)))?;
        migrations::run_migrations(&conn)?;
        drop(conn);

        info!("Database opened at {}", path.display());

        Ok(Self {
            target: Target::File(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, ParleyError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ParleyError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        migrations::run_migrations(&conn)?;

        Ok(Self {
            target: Target::Memory(Mutex::new(conn)),
        })
    }

    /// Execute a closure with a connection to the database.
    ///
    /// For file-backed databases the connection lives only for the duration
    /// of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ParleyError>
    where
        F: FnOnce(&Connection) -> Result<T, ParleyError>,
    {
        match &self.target {
            Target::File(path) => {
                let conn = open_file(path)?;
                f(&conn)
            }
            Target::Memory(conn) => {
                let conn = conn
                    .lock()
                    .map_err(|e| ParleyError::Storage(format!("Database lock poisoned: {}", e)))?;
                f(&conn)
            }
        }
    }

    /// Path of the database file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        match &self.target {
            Target::File(path) => Some(path),
            Target::Memory(_) => None,
        }
    }
}

fn open_file(path: &Path) -> Result<Connection, ParleyError> {
    let conn = Connection::open(path)
        .map_err(|e| ParleyError::Storage(format!("Failed to open database: {}", e)))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|e| ParleyError::Storage(format!("Failed to set busy timeout: {}", e)))?;
    conn.execute_batch("PRAGMA synchronous = NORMAL;")
        .map_err(|e| ParleyError::Storage(format!("Failed to set pragmas: {}", e)))?;
    debug!(path = %path.display(), "Opened database connection");
    Ok(conn)
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_messages(db: &Database) -> i64 {
        db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
                .map_err(|e| ParleyError::Storage(e.to_string()))
        })
        .unwrap()
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        assert_eq!(count_messages(&db), 0);
        assert!(db.path().is_none());
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chat_history.db");
        let db = Database::new(&path).unwrap();

        assert_eq!(count_messages(&db), 0);
        assert!(path.exists());
        assert_eq!(db.path(), Some(path.as_path()));
    }

    #[test]
    fn test_file_database_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_history.db");
        let db = Database::new(&path).unwrap();

        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (session_id, role, content) VALUES ('s', 'human', 'hi')",
                [],
            )
            .map_err(|e| ParleyError::Storage(e.to_string()))?;
            Ok(())
        })
        .unwrap();

        assert_eq!(count_messages(&db), 1);

        // Reopening runs migrations again without touching existing rows.
        let reopened = Database::new(&path).unwrap();
        assert_eq!(count_messages(&reopened), 1);
    }

    #[test]
    fn test_wal_mode_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("wal.db")).unwrap();
        let mode: String = db
            .with_conn(|conn| {
                conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))
                    .map_err(|e| ParleyError::Storage(e.to_string()))
            })
            .unwrap();
        assert_eq!(mode, "wal");
    }
}
