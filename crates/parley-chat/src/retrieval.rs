//! History-aware retrieval.
//!
//! A follow-up such as "when was it published?" is useless as a search query
//! on its own, so the chat model first rewrites it into a standalone query
//! using the conversation so far. The rewritten query is then embedded and
//! matched against the vector index.

use std::sync::Arc;

use tracing::{debug, warn};

use parley_core::types::{Message, RetrievedDocument};
use parley_vector::SearchEngine;

use crate::error::ChatError;
use crate::llm::ChatModel;
use crate::prompt::rewrite_prompt;

/// Output of one retrieval: the query actually searched and its documents.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub query: String,
    pub documents: Vec<RetrievedDocument>,
}

/// Rewrites the message into a standalone query and fetches the top-k documents.
#[derive(Clone)]
pub struct RetrievalPipeline {
    model: Arc<dyn ChatModel>,
    search: SearchEngine,
    top_k: usize,
}

impl RetrievalPipeline {
    pub fn new(model: Arc<dyn ChatModel>, search: SearchEngine, top_k: usize) -> Self {
        Self {
            model,
            search,
            top_k,
        }
    }

    /// Run retrieval for `message` given the prior `history`.
    ///
    /// With no history there is nothing to resolve against, so the message
    /// is searched verbatim and the model is not called.
    pub async fn retrieve(
        &self,
        message: &str,
        history: &[Message],
    ) -> Result<Retrieval, ChatError> {
        let query = if history.is_empty() {
            message.to_string()
        } else {
            let rewritten = self.model.generate(&rewrite_prompt(history, message)).await?;
            let rewritten = rewritten.trim();
            if rewritten.is_empty() {
                warn!(model = self.model.name(), "Empty query rewrite, searching original message");
                message.to_string()
            } else {
                rewritten.to_string()
            }
        };

        debug!(query = %query, top_k = self.top_k, "Retrieving documents");
        let documents = self.search.similarity_search(&query, self.top_k).await?;

        Ok(Retrieval { query, documents })
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }
}

impl std::fmt::Debug for RetrievalPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalPipeline")
            .field("model", &self.model.name())
            .field("search", &self.search)
            .field("top_k", &self.top_k)
            .finish()
    }
}
