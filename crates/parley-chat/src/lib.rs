//! Retrieval-augmented chat for Parley.
//!
//! Provides the chat model clients, prompt assembly, the history-aware
//! retrieval pipeline and the answer pipeline.

pub mod answer;
pub mod error;
pub mod llm;
pub mod prompt;
pub mod retrieval;

pub use answer::AnswerPipeline;
pub use error::ChatError;
pub use llm::{ChatModel, GeminiChatModel, ScriptedChatModel};
pub use prompt::{PromptMessage, PromptRole};
pub use retrieval::{Retrieval, RetrievalPipeline};
