//! Database schema migrations.
//!
//! Applies the conversation log schema and records each version in the
//! schema_migrations table.

use rusqlite::Connection;
use tracing::info;

use parley_core::error::ParleyError;

/// Run all pending database migrations.
///
/// `CREATE ... IF NOT EXISTS` keeps a pre-existing `messages` table (and its
/// rows) intact; only the bookkeeping and index are added around it.
pub fn run_migrations(conn: &Connection) -> Result<(), ParleyError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ParleyError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ParleyError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: messages");
    }

    Ok(())
}

/// Version 1: the append-only messages log.
fn apply_v1(conn: &Connection) -> Result<(), ParleyError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id  TEXT NOT NULL,
            role        TEXT CHECK (role IN ('human', 'ai')) NOT NULL,
            content     TEXT NOT NULL,
            ts          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages (session_id, id);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'messages');
        ",
    )
    .map_err(|e| ParleyError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
