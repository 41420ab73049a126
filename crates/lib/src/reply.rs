//! Reply generation: two-turn prompt (system with context, user with the raw text) and one completion call.

use crate::llm::{ChatMessage, CompletionBackend, LlmError};
use std::time::Duration;

const SYSTEM_PROMPT_PREFIX: &str =
    "You are a helpful assistant. Use the following context to answer the user's question. Context: ";

/// Context plus the user's message, built per request.
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub context: String,
    pub user_text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Provider(#[from] LlmError),
    #[error("provider returned no choices")]
    NoChoices,
    #[error("first choice has no message content")]
    MissingContent,
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
}

impl ReplyRequest {
    pub fn new(context: impl Into<String>, user_text: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            user_text: user_text.into(),
        }
    }

    /// Fixed instruction with the context embedded verbatim.
    pub fn system_prompt(&self) -> String {
        format!("{}{}", SYSTEM_PROMPT_PREFIX, self.context)
    }

    /// Exactly two turns: system, then the user's text unmodified.
    pub fn messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(self.user_text.clone()),
        ]
    }
}

/// Call the backend once and return the first choice's text.
pub async fn generate_reply(
    backend: &dyn CompletionBackend,
    model: &str,
    request: &ReplyRequest,
    timeout: Duration,
) -> Result<String, GenerationError> {
    log::info!("reply: requesting completion from model {}", model);
    let completion = tokio::time::timeout(timeout, backend.complete(model, request.messages()))
        .await
        .map_err(|_| GenerationError::Timeout(timeout))??;
    if completion.choices.is_empty() {
        return Err(GenerationError::NoChoices);
    }
    let text = completion
        .first_content()
        .ok_or(GenerationError::MissingContent)?
        .to_string();
    log::info!("reply: received completion ({} chars)", text.len());
    Ok(text)
}
