//! In-memory vector index with brute-force cosine similarity search.
//!
//! A collection is loaded from disk once at startup and then only read, so
//! O(n) search over a few thousand chunks is more than fast enough.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use uuid::Uuid;

use parley_core::error::ParleyError;

/// A single hit returned from a vector search.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The ID of the matching document.
    pub id: Uuid,
    /// Cosine similarity score (-1.0 to 1.0).
    pub score: f64,
    /// The document text.
    pub content: String,
    /// Metadata associated with the document.
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct VectorEntry {
    /// Insertion order; breaks score ties so results are deterministic.
    seq: u64,
    embedding: Vec<f32>,
    content: String,
    metadata: Map<String, Value>,
}

#[derive(Debug, Default)]
struct Entries {
    next_seq: u64,
    by_id: HashMap<Uuid, VectorEntry>,
}

/// In-memory vector index using brute-force cosine similarity.
///
/// Thread-safe via interior RwLock; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    entries: Arc<RwLock<Entries>>,
}

impl VectorIndex {
    /// Create a new empty vector index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document and its embedding.
    ///
    /// Overwrites any existing entry with the same ID.
    pub fn insert(
        &self,
        id: Uuid,
        embedding: Vec<f32>,
        content: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Result<(), ParleyError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| ParleyError::VectorStore(format!("Lock poisoned: {}", e)))?;
        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.by_id.insert(
            id,
            VectorEntry {
                seq,
                embedding,
                content: content.into(),
                metadata,
            },
        );
        Ok(())
    }

    /// Search for the k nearest neighbors to the query vector by cosine similarity.
    ///
    /// Returns results sorted by descending score; equal scores keep
    /// insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, ParleyError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| ParleyError::VectorStore(format!("Lock poisoned: {}", e)))?;

        let mut scored: Vec<(f64, u64, &Uuid, &VectorEntry)> = entries
            .by_id
            .iter()
            .map(|(id, entry)| (cosine_similarity(query, &entry.embedding), entry.seq, id, entry))
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, _, id, entry)| SearchHit {
                id: *id,
                score,
                content: entry.content.clone(),
                metadata: entry.metadata.clone(),
            })
            .collect())
    }

    /// Return the number of vectors currently stored in the index.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.by_id.len()).unwrap_or(0)
    }

    /// Return true if the index contains no vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let (dot, mag_a, mag_b) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |acc, (x, y)| {
        let (x, y) = (*x as f64, *y as f64);
        (acc.0 + x * y, acc.1 + x * x, acc.2 + y * y)
    });

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a.sqrt() * mag_b.sqrt())
}
