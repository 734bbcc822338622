//! Error types for the retrieval and answer pipelines.

use parley_core::error::ParleyError;

/// Errors from the chat pipelines.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("LLM error: {0}")]
    Llm(String),
    #[error("LLM returned no text: {0}")]
    EmptyResponse(String),
    #[error("retrieval error: {0}")]
    Retrieval(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<ParleyError> for ChatError {
    fn from(err: ParleyError) -> Self {
        match err {
            ParleyError::Llm(msg) => ChatError::Llm(msg),
            ParleyError::Config(msg) => ChatError::Config(msg),
            other => ChatError::Retrieval(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::Llm(format!("request timed out: {}", err))
        } else {
            ChatError::Llm(err.to_string())
        }
    }
}
