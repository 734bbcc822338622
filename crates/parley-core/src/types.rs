use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ParleyError;

/// Placeholder used in `sources` when a document carries neither a title nor a source.
pub const UNKNOWN_SOURCE: &str = "Unknown";

// =============================================================================
// Conversation log
// =============================================================================

/// Author of a stored message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The end user.
    #[serde(rename = "human")]
    Human,
    /// The assistant. Persisted and serialized as `ai`.
    #[serde(rename = "ai")]
    Assistant,
}

impl Role {
    /// The value stored in the `messages.role` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Human => "human",
            Role::Assistant => "ai",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParleyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(Role::Human),
            "ai" => Ok(Role::Assistant),
            other => Err(ParleyError::Storage(format!("Unknown message role: {}", other))),
        }
    }
}

/// A single persisted conversation message. Immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Insertion id; strictly increasing across the whole log.
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate view of one conversation, derived from its messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub session_id: String,
    /// Number of stored messages.
    pub messages: u64,
    /// Timestamp of the newest message.
    pub last_activity: DateTime<Utc>,
}

// =============================================================================
// Retrieval
// =============================================================================

/// A document returned by the vector store for one request. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    /// The text chunk fed into the answer prompt.
    pub content: String,
    /// Free-form metadata; `title` and `source` are used for attribution.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Cosine similarity to the query.
    #[serde(default)]
    pub score: f64,
}

impl RetrievedDocument {
    pub fn new(content: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            content: content.into(),
            metadata,
            score: 0.0,
        }
    }

    /// Attribution label: the `title` metadata, else `source`, else [`UNKNOWN_SOURCE`].
    ///
    /// Empty strings and non-string values count as absent.
    pub fn source_label(&self) -> &str {
        ["title", "source"]
            .iter()
            .filter_map(|key| self.metadata.get(*key).and_then(Value::as_str))
            .find(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_SOURCE)
    }
}

/// Distinct attribution labels of `docs` in first-seen order.
pub fn distinct_sources(docs: &[RetrievedDocument]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for doc in docs {
        let label = doc.source_label();
        if seen.insert(label) {
            sources.push(label.to_string());
        }
    }
    sources
}
