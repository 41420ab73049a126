//! Inbound message from the messaging platform, normalized from a webhook payload.

use serde::Deserialize;

/// Message direction as reported by the platform. Only `Received` is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Received,
    Sent,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Direction::Received => "received",
            Direction::Sent => "sent",
            Direction::Other => "other",
        };
        f.write_str(s)
    }
}

/// Where a reply is delivered: an existing conversation (conversation-reply API) or a recipient address (legacy send).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTarget {
    Conversation(String),
    Recipient(String),
}

impl std::fmt::Display for ReplyTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyTarget::Conversation(id) => write!(f, "conversation {}", id),
            ReplyTarget::Recipient(to) => write!(f, "recipient {}", to),
        }
    }
}

/// A message from the platform to be answered. At least one of `sender` / `conversation_id` is set.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender: Option<String>,
    pub conversation_id: Option<String>,
    pub text: String,
    pub direction: Direction,
}

impl InboundMessage {
    /// Conversation-reply when a conversation id is known, otherwise address the sender.
    pub fn reply_target(&self) -> Option<ReplyTarget> {
        self.conversation_id
            .clone()
            .map(ReplyTarget::Conversation)
            .or_else(|| self.sender.clone().map(ReplyTarget::Recipient))
    }
}
