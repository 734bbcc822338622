//! Search engine combining query embedding with vector search.
//!
//! SearchEngine embeds the query with the EmbeddingService and looks up the
//! nearest documents in a loaded VectorIndex.

use std::sync::Arc;

use tracing::debug;

use parley_core::error::ParleyError;
use parley_core::types::RetrievedDocument;

use crate::embedding::{DynEmbeddingService, EmbeddingService};
use crate::index::VectorIndex;

/// Similarity search over one loaded collection.
///
/// Uses dynamic dispatch (`Arc<dyn DynEmbeddingService>`) so that production
/// code can supply `OnnxEmbeddingService` while tests use `MockEmbedding`.
#[derive(Clone)]
pub struct SearchEngine {
    index: VectorIndex,
    embedder: Arc<dyn DynEmbeddingService>,
}

impl SearchEngine {
    /// Create a new search engine over an index and an embedding service.
    pub fn new(index: VectorIndex, embedder: impl EmbeddingService + 'static) -> Self {
        Self {
            index,
            embedder: Arc::new(embedder),
        }
    }

    /// Embed `query` and return the `k` most similar documents, best first.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedDocument>, ParleyError> {
        let query_vec = self.embedder.embed_boxed(query).await?;
        if query_vec.len() != self.embedder.dimensions() {
            return Err(ParleyError::Embedding(format!(
                "Query embedding has {} dimensions, expected {}",
                query_vec.len(),
                self.embedder.dimensions()
            )));
        }

        let hits = self.index.search(&query_vec, k)?;
        debug!(k, hits = hits.len(), "Similarity search complete");

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedDocument {
                content: hit.content,
                metadata: hit.metadata,
                score: hit.score,
            })
            .collect())
    }
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("documents", &self.index.len())
            .field("dimensions", &self.embedder.dimensions())
            .finish()
    }
}
