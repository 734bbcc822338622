//! Indexing pipeline.
//!
//! Reads source documents, embeds them and writes them to a collection of a
//! [`VectorStore`]. This is how the index that the server loads at startup
//! gets built.

use std::io::BufRead;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_core::error::ParleyError;

use crate::embedding::EmbeddingService;
use crate::store::{StoredDocument, VectorStore};

/// One document to index, as read from a JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Result of an ingestion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IngestResult {
    /// The document was stored successfully.
    Stored { id: Uuid },
    /// The document was skipped (e.g., empty text).
    Skipped { reason: String },
}

/// Totals for a batch ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub stored: usize,
    pub skipped: usize,
}

/// Embeds documents and appends them to one collection.
pub struct IndexingPipeline<'s, E: EmbeddingService> {
    store: &'s VectorStore,
    collection: String,
    embedder: E,
}

impl<'s, E: EmbeddingService> IndexingPipeline<'s, E> {
    /// Create a pipeline writing to `collection`, creating the collection
    /// with the embedder's dimension if it does not exist.
    pub fn new(
        store: &'s VectorStore,
        collection: impl Into<String>,
        embedder: E,
    ) -> Result<Self, ParleyError> {
        let collection = collection.into();
        store.ensure_collection(&collection, embedder.dimensions())?;
        Ok(Self {
            store,
            collection,
            embedder,
        })
    }

    /// Embed and store a single document.
    pub async fn ingest(&self, doc: SourceDocument) -> Result<IngestResult, ParleyError> {
        if doc.content.trim().is_empty() {
            debug!("Skipping document with empty content");
            return Ok(IngestResult::Skipped {
                reason: "Empty content".to_string(),
            });
        }

        let embedding = self.embedder.embed(&doc.content).await?;
        let id = Uuid::new_v4();
        self.store.add_documents(
            &self.collection,
            &[StoredDocument {
                id,
                content: doc.content,
                metadata: doc.metadata,
                embedding,
            }],
        )?;

        debug!(id = %id, collection = %self.collection, "Document indexed");
        Ok(IngestResult::Stored { id })
    }

    /// Ingest JSON lines of the form `{"content": ..., "metadata": {...}}`.
    ///
    /// Blank lines are ignored; a line that is not a valid document aborts
    /// the batch with its line number. Documents before it stay stored.
    pub async fn ingest_jsonl<R: BufRead>(&self, reader: R) -> Result<IngestSummary, ParleyError> {
        let mut summary = IngestSummary::default();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let doc: SourceDocument = serde_json::from_str(&line).map_err(|e| {
                ParleyError::Serialization(format!("Line {}: {}", line_no + 1, e))
            })?;

            match self.ingest(doc).await? {
                IngestResult::Stored { .. } => summary.stored += 1,
                IngestResult::Skipped { reason } => {
                    warn!(line = line_no + 1, reason = %reason, "Skipped document");
                    summary.skipped += 1;
                }
            }
        }

        info!(
            collection = %self.collection,
            stored = summary.stored,
            skipped = summary.skipped,
            "Ingestion complete"
        );
        Ok(summary)
    }

    /// Ingest a JSON lines file.
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestSummary, ParleyError> {
        let file = std::fs::File::open(path).map_err(|e| {
            ParleyError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        self.ingest_jsonl(std::io::BufReader::new(file)).await
    }

    /// Name of the collection this pipeline writes to.
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedding;
    use std::io::Cursor;

    fn source(content: &str) -> SourceDocument {
        SourceDocument {
            content: content.to_string(),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_new_creates_collection() {
        let store = VectorStore::in_memory().unwrap();
        let pipeline = IndexingPipeline::new(&store, "articles", MockEmbedding::new()).unwrap();
        assert_eq!(pipeline.collection(), "articles");

        let info = store.collection("articles").unwrap().unwrap();
        assert_eq!(info.dimensions, crate::embedding::DEFAULT_DIMENSIONS);
    }

    #[tokio::test]
    async fn test_ingest_stores() {
        let store = VectorStore::in_memory().unwrap();
        let pipeline = IndexingPipeline::new(&store, "articles", MockEmbedding::new()).unwrap();

        let result = pipeline.ingest(source("Tokio is an async runtime")).await.unwrap();
        assert!(matches!(result, IngestResult::Stored { .. }));
        assert_eq!(store.count("articles").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ingest_skips_empty() {
        let store = VectorStore::in_memory().unwrap();
        let pipeline = IndexingPipeline::new(&store, "articles", MockEmbedding::new()).unwrap();

        let result = pipeline.ingest(source("  \n ")).await.unwrap();
        assert!(matches!(result, IngestResult::Skipped { .. }));
        assert_eq!(store.count("articles").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ingest_jsonl() {
        let store = VectorStore::in_memory().unwrap();
        let pipeline = IndexingPipeline::new(&store, "articles", MockEmbedding::new()).unwrap();

        let input = concat!(
            "{\"content\": \"Axum routing basics\", \"metadata\": {\"title\": \"Axum\"}}\n",
            "\n",
            "{\"content\": \"\"}\n",
            "{\"content\": \"SQLite WAL mode\", \"metadata\": {\"source\": \"sqlite.md\"}}\n",
        );
        let summary = pipeline.ingest_jsonl(Cursor::new(input)).await.unwrap();
        assert_eq!(summary, IngestSummary { stored: 2, skipped: 1 });

        let index = store.load_collection("articles").unwrap();
        let query = MockEmbedding::new().embed("Axum routing basics").await.unwrap();
        let hits = index.search(&query, 1).unwrap();
        assert_eq!(hits[0].metadata["title"], "Axum");
    }

    #[tokio::test]
    async fn test_ingest_jsonl_reports_bad_line() {
        let store = VectorStore::in_memory().unwrap();
        let pipeline = IndexingPipeline::new(&store, "articles", MockEmbedding::new()).unwrap();

        let input = "{\"content\": \"fine\"}\nnot json\n";
        let err = pipeline.ingest_jsonl(Cursor::new(input)).await.unwrap_err();
        assert!(err.to_string().contains("Line 2"));
        assert_eq!(store.count("articles").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ingest_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.jsonl");
        std::fs::write(&path, "{\"content\": \"from a file\"}\n").unwrap();

        let store = VectorStore::create(&dir.path().join("store")).unwrap();
        let pipeline = IndexingPipeline::new(&store, "articles", MockEmbedding::new()).unwrap();
        let summary = pipeline.ingest_file(&path).await.unwrap();
        assert_eq!(summary.stored, 1);

        assert!(pipeline.ingest_file(&dir.path().join("missing.jsonl")).await.is_err());
    }
}
