//! Parley Vector crate - embedding service, vector collections and similarity search.
//!
//! Provides an ONNX sentence-transformer embedding service (with a mock for
//! testing), a persistent collection store, an in-memory cosine index that
//! collections are loaded into, the search engine used for retrieval, and the
//! pipeline that builds collections from source documents.

pub mod embedding;
pub mod index;
pub mod pipeline;
pub mod search;
pub mod store;

pub use embedding::{DynEmbeddingService, EmbeddingService, MockEmbedding, OnnxEmbeddingService};
pub use index::{SearchHit, VectorIndex};
pub use pipeline::{IndexingPipeline, IngestResult, IngestSummary, SourceDocument};
pub use search::SearchEngine;
pub use store::{CollectionInfo, StoredDocument, VectorStore};
