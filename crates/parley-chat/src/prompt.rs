//! Prompt assembly for the rewrite and answer calls.

use serde::{Deserialize, Serialize};

use parley_core::types::{Message, RetrievedDocument, Role};

/// Instruction for turning a follow-up into a standalone search query.
pub const REWRITE_INSTRUCTION: &str = "Rewrite the user's last question as a standalone query, using the chat history for context. Don't answer the question.";

/// Instruction for answering from retrieved context.
pub const ANSWER_INSTRUCTION: &str =
    "You are a helpful assistant. Use the provided context to answer.";

/// Speaker of one prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Model,
}

/// One message of a prompt sent to the chat model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Model,
            content: content.into(),
        }
    }
}

/// Map stored history onto prompt messages, keeping order.
pub fn history_messages(history: &[Message]) -> Vec<PromptMessage> {
    history
        .iter()
        .map(|m| match m.role {
            Role::Human => PromptMessage::user(m.content.clone()),
            Role::Assistant => PromptMessage::model(m.content.clone()),
        })
        .collect()
}

/// Prompt for the query rewrite: instruction, history, then the new message.
pub fn rewrite_prompt(history: &[Message], message: &str) -> Vec<PromptMessage> {
    let mut prompt = Vec::with_capacity(history.len() + 2);
    prompt.push(PromptMessage::system(REWRITE_INSTRUCTION));
    prompt.extend(history_messages(history));
    prompt.push(PromptMessage::user(message));
    prompt
}

/// Document contents joined by blank lines.
pub fn format_context(documents: &[RetrievedDocument]) -> String {
    documents
        .iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prompt for the answer: instruction, context block, history, new message.
pub fn answer_prompt(
    documents: &[RetrievedDocument],
    history: &[Message],
    message: &str,
) -> Vec<PromptMessage> {
    let mut prompt = Vec::with_capacity(history.len() + 3);
    prompt.push(PromptMessage::system(ANSWER_INSTRUCTION));
    prompt.push(PromptMessage::system(format!(
        "Context: {}",
        format_context(documents)
    )));
    prompt.extend(history_messages(history));
    prompt.push(PromptMessage::user(message));
    prompt
}
