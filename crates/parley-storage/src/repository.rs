//! Conversation log repository.
//!
//! Messages are only ever inserted or deleted per session; there is no update
//! path. Ordering within a session is the insertion id.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::Row;
use tracing::debug;

use parley_core::error::ParleyError;
use parley_core::types::{ConversationSummary, Message, Role};

use crate::db::Database;

/// Append-only store of conversation messages.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    db: Arc<Database>,
}

impl ConversationStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append one message stamped with the current time.
    pub fn append(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message, ParleyError> {
        self.append_at(session_id, role, content, Utc::now())
    }

    /// Append one message with an explicit timestamp.
    pub fn append_at(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Message, ParleyError> {
        self.db
            .with_conn(|conn| insert_message(conn, session_id, role, content, timestamp))
    }

    /// Append a completed turn: the human message followed by the answer.
    ///
    /// Both rows are written in one transaction, so a turn is stored whole or
    /// not at all.
    pub fn append_turn(
        &self,
        session_id: &str,
        question: &str,
        answer: &str,
    ) -> Result<(Message, Message), ParleyError> {
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| ParleyError::Storage(format!("Failed to begin turn: {}", e)))?;
            let now = Utc::now();
            let human = insert_message(&tx, session_id, Role::Human, question, now)?;
            let ai = insert_message(&tx, session_id, Role::Assistant, answer, now)?;
            tx.commit()
                .map_err(|e| ParleyError::Storage(format!("Failed to commit turn: {}", e)))?;
            debug!(session_id, human_id = human.id, ai_id = ai.id, "Stored turn");
            Ok((human, ai))
        })
    }

    /// All messages of a session in insertion order. Unknown sessions yield an empty list.
    pub fn list(&self, session_id: &str) -> Result<Vec<Message>, ParleyError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, session_id, role, content, ts
                     FROM messages
                     WHERE session_id = ?1
                     ORDER BY id",
                )
                .map_err(|e| ParleyError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![session_id], |row| Ok(row_to_message(row)))
                .map_err(|e| ParleyError::Storage(e.to_string()))?;

            let mut messages = Vec::new();
            for row in rows {
                let message = row.map_err(|e| ParleyError::Storage(e.to_string()))??;
                messages.push(message);
            }
            Ok(messages)
        })
    }

    /// Delete every message of a session and return how many were removed.
    pub fn delete_all(&self, session_id: &str) -> Result<u64, ParleyError> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM messages WHERE session_id = ?1",
                    rusqlite::params![session_id],
                )
                .map_err(|e| ParleyError::Storage(format!("Failed to delete history: {}", e)))?;
            Ok(removed as u64)
        })
    }

    /// Every session with at least one message, most recently active first.
    ///
    /// Timestamps are compared as instants through `julianday`, so rows in
    /// SQLite's `YYYY-MM-DD HH:MM:SS` form order correctly against RFC 3339.
    pub fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ParleyError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT m.session_id,
                            COUNT(*) AS total,
                            (SELECT l.ts FROM messages l
                             WHERE l.session_id = m.session_id
                             ORDER BY julianday(l.ts) DESC, l.id DESC
                             LIMIT 1) AS last_ts,
                            MAX(julianday(m.ts)) AS last_day,
                            MAX(m.id) AS last_id
                     FROM messages m
                     GROUP BY m.session_id
                     ORDER BY last_day DESC, last_id DESC",
                )
                .map_err(|e| ParleyError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| {
                    let session_id: String = row.get(0)?;
                    let total: i64 = row.get(1)?;
                    let last_ts: String = row.get(2)?;
                    Ok((session_id, total, last_ts))
                })
                .map_err(|e| ParleyError::Storage(e.to_string()))?;

            let mut summaries = Vec::new();
            for row in rows {
                let (session_id, total, last_ts) =
                    row.map_err(|e| ParleyError::Storage(e.to_string()))?;
                summaries.push(ConversationSummary {
                    session_id,
                    messages: total as u64,
                    last_activity: parse_timestamp(&last_ts)?,
                });
            }
            Ok(summaries)
        })
    }
}

fn insert_message(
    conn: &rusqlite::Connection,
    session_id: &str,
    role: Role,
    content: &str,
    timestamp: DateTime<Utc>,
) -> Result<Message, ParleyError> {
    conn.execute(
        "INSERT INTO messages (session_id, role, content, ts) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            session_id,
            role.as_str(),
            content,
            format_timestamp(timestamp),
        ],
    )
    .map_err(|e| ParleyError::Storage(format!("Failed to save message: {}", e)))?;

    Ok(Message {
        id: conn.last_insert_rowid(),
        session_id: session_id.to_string(),
        role,
        content: content.to_string(),
        timestamp,
    })
}

fn row_to_message(row: &Row<'_>) -> Result<Message, ParleyError> {
    let id: i64 = row.get(0).map_err(|e| ParleyError::Storage(e.to_string()))?;
    let session_id: String = row.get(1).map_err(|e| ParleyError::Storage(e.to_string()))?;
    let role: String = row.get(2).map_err(|e| ParleyError::Storage(e.to_string()))?;
    let content: String = row.get(3).map_err(|e| ParleyError::Storage(e.to_string()))?;
    let ts: String = row.get(4).map_err(|e| ParleyError::Storage(e.to_string()))?;

    Ok(Message {
        id,
        session_id,
        role: role.parse()?,
        content,
        timestamp: parse_timestamp(&ts)?,
    })
}

/// RFC 3339 with milliseconds and a `Z` suffix, which `julianday` understands.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp. Accepts RFC 3339 and SQLite's
/// `CURRENT_TIMESTAMP` format (`YYYY-MM-DD HH:MM:SS`, UTC).
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ParleyError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| ParleyError::Storage(format!("Invalid timestamp '{}': {}", raw, e)))
}
