//! Answer generation from retrieved context.

use std::sync::Arc;

use tracing::debug;

use parley_core::types::{Message, RetrievedDocument};

use crate::error::ChatError;
use crate::llm::ChatModel;
use crate::prompt::answer_prompt;

/// Produces the final answer with one chat-model call.
#[derive(Clone)]
pub struct AnswerPipeline {
    model: Arc<dyn ChatModel>,
}

impl AnswerPipeline {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Answer `message` from `documents`, with the prior `history` in the prompt.
    ///
    /// The model output is returned as-is.
    pub async fn answer(
        &self,
        message: &str,
        history: &[Message],
        documents: &[RetrievedDocument],
    ) -> Result<String, ChatError> {
        let prompt = answer_prompt(documents, history, message);
        let answer = self.model.generate(&prompt).await?;
        debug!(
            model = self.model.name(),
            documents = documents.len(),
            chars = answer.len(),
            "Answer generated"
        );
        Ok(answer)
    }
}

impl std::fmt::Debug for AnswerPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerPipeline")
            .field("model", &self.model.name())
            .finish()
    }
}
