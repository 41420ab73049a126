//! Reply delivery seam: the gateway hands generated text to a dispatcher.

use crate::channels::inbound::ReplyTarget;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("messaging request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("messaging api error: {0}")]
    Api(String),
    #[error("messaging api key not configured")]
    MissingApiKey,
    #[error("legacy send needs an originator (set MESSAGEBIRD_CHANNEL_ID)")]
    MissingOriginator,
    #[error("conversation id {0:?} is not a usable path segment")]
    InvalidConversationId(String),
    #[error("invalid messaging base url: {0}")]
    InvalidBaseUrl(String),
    #[error("dispatch timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Sends reply text back through the messaging platform.
#[async_trait]
pub trait ReplyDispatcher: Send + Sync {
    /// Deliver `text` to `target`. No retries; the caller logs failures.
    async fn send_reply(&self, target: &ReplyTarget, text: &str) -> Result<(), DispatchError>;
}
