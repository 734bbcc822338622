//! Application state shared across all route handlers.
//!
//! Everything in AppState is built once at startup and only read afterwards.
//! It is passed to handlers via axum's State extractor.

use std::sync::Arc;

use parley_chat::{AnswerPipeline, RetrievalPipeline};
use parley_storage::{ConversationStore, Database};

/// Shared application state.
///
/// All fields are `Arc`-backed for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Conversation log.
    pub store: ConversationStore,
    /// Query rewrite + similarity search.
    pub retrieval: Arc<RetrievalPipeline>,
    /// Answer generation.
    pub answer: Arc<AnswerPipeline>,
}

impl AppState {
    /// Create a new AppState with the given components.
    pub fn new(
        database: Database,
        retrieval: RetrievalPipeline,
        answer: AnswerPipeline,
    ) -> Self {
        Self {
            store: ConversationStore::new(Arc::new(database)),
            retrieval: Arc::new(retrieval),
            answer: Arc::new(answer),
        }
    }
}
