//! Webhook payload shapes and normalization into [`InboundMessage`].
//!
//! The platform has delivered three shapes over time; each has its own parser:
//! - conversation events (`message.direction`, `message.content.text`, conversation id),
//! - flat JSON objects with a top-level `text` (sender in the body or the originator header),
//! - raw text bodies from the Flow Builder "Call API" step (opt-in, sender only in the header).

use crate::channels::inbound::{Direction, InboundMessage};
use crate::config::WebhookConfig;
use axum::http::HeaderMap;
use serde::Deserialize;

/// Header Flow Builder uses to pass the sender when the body is bare text.
pub const ORIGINATOR_HEADER: &str = "x-messagebird-originator";

/// Why a webhook was not turned into an [`InboundMessage`]. The webhook is still acknowledged with 200.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error("payload unparseable: {0}")]
    Unparseable(String),
    #[error("required field missing: {0}")]
    FieldsMissing(&'static str),
    #[error("message direction is {0}, only received messages are answered")]
    NotReceived(Direction),
}

/// Conversation event (`message.created` style).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEvent {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub conversation: Option<ConversationRef>,
    pub message: ConversationMessage,
}

#[derive(Debug, Deserialize)]
pub struct ConversationRef {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

#[derive(Debug, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub text: Option<String>,
}

/// Flat object with the text at the top level.
#[derive(Debug, Deserialize)]
pub struct FlatEvent {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub originator: Option<String>,
}

/// One of the known webhook payload shapes.
#[derive(Debug)]
pub enum WebhookPayload {
    Conversation(ConversationEvent),
    Flat(FlatEvent),
    RawText(String),
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn originator_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ORIGINATOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl WebhookPayload {
    /// Pick the payload shape from the body. Non-JSON bodies are raw text only when `accept_raw_text` is set.
    pub fn parse(body: &[u8], accept_raw_text: bool) -> Result<Self, Rejection> {
        let value: serde_json::Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) if accept_raw_text => {
                let text = std::str::from_utf8(body)
                    .map_err(|_| Rejection::Unparseable(format!("body is neither JSON ({}) nor UTF-8 text", e)))?;
                return Ok(WebhookPayload::RawText(text.to_string()));
            }
            Err(e) => return Err(Rejection::Unparseable(e.to_string())),
        };
        let obj = match value {
            serde_json::Value::Object(ref obj) => obj,
            // A JSON string is the text itself; any other scalar such as `42` is taken as written.
            serde_json::Value::String(s) if accept_raw_text => {
                return Ok(WebhookPayload::RawText(s));
            }
            _ if accept_raw_text => {
                return Ok(WebhookPayload::RawText(String::from_utf8_lossy(body).into_owned()));
            }
            _ => return Err(Rejection::Unparseable("body is not a JSON object".to_string())),
        };
        if obj.get("message").map_or(false, |m| m.is_object()) {
            serde_json::from_value(value)
                .map(WebhookPayload::Conversation)
                .map_err(|e| Rejection::Unparseable(format!("conversation event: {}", e)))
        } else if obj.contains_key("text") {
            serde_json::from_value(value)
                .map(WebhookPayload::Flat)
                .map_err(|e| Rejection::Unparseable(format!("flat event: {}", e)))
        } else {
            Err(Rejection::FieldsMissing("message"))
        }
    }

    /// Extract the processable message, or the reason it is not processable.
    pub fn into_inbound(self, headers: &HeaderMap) -> Result<InboundMessage, Rejection> {
        match self {
            WebhookPayload::Conversation(event) => conversation_inbound(event),
            WebhookPayload::Flat(event) => {
                let text = present(event.text).ok_or(Rejection::FieldsMissing("text"))?;
                let sender = present(event.from)
                    .or_else(|| present(event.originator))
                    .or_else(|| originator_header(headers))
                    .ok_or(Rejection::FieldsMissing("from"))?;
                Ok(InboundMessage {
                    sender: Some(sender),
                    conversation_id: None,
                    text,
                    direction: Direction::Received,
                })
            }
            WebhookPayload::RawText(text) => {
                let text = present(Some(text)).ok_or(Rejection::FieldsMissing("text"))?;
                let sender =
                    originator_header(headers).ok_or(Rejection::FieldsMissing(ORIGINATOR_HEADER))?;
                Ok(InboundMessage {
                    sender: Some(sender),
                    conversation_id: None,
                    text,
                    direction: Direction::Received,
                })
            }
        }
    }
}

fn conversation_inbound(event: ConversationEvent) -> Result<InboundMessage, Rejection> {
    let message = event.message;
    let direction = message
        .direction
        .ok_or(Rejection::FieldsMissing("message.direction"))?;
    if direction != Direction::Received {
        return Err(Rejection::NotReceived(direction));
    }
    let text = present(message.content.and_then(|c| c.text))
        .ok_or(Rejection::FieldsMissing("message.content.text"))?;
    let conversation_id = present(event.conversation_id)
        .or_else(|| present(event.conversation.and_then(|c| c.id)))
        .or_else(|| present(message.conversation_id));
    let sender = present(message.from);
    if conversation_id.is_none() && sender.is_none() {
        return Err(Rejection::FieldsMissing("conversationId"));
    }
    Ok(InboundMessage {
        sender,
        conversation_id,
        text,
        direction,
    })
}

/// Normalize a webhook request body (and headers) into an [`InboundMessage`].
pub fn normalize(
    headers: &HeaderMap,
    body: &[u8],
    options: &WebhookConfig,
) -> Result<InboundMessage, Rejection> {
    WebhookPayload::parse(body, options.accept_raw_text)?.into_inbound(headers)
}
