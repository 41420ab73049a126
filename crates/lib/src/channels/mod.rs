//! Messaging platform channel (MessageBird).
//!
//! Inbound webhook payloads are normalized into [`InboundMessage`]; replies go out through a
//! [`ReplyDispatcher`], either as a conversation reply or as a legacy address-based send.

mod dispatch;
mod inbound;
mod messagebird;
pub mod payload;

pub use dispatch::{DispatchError, ReplyDispatcher};
pub use inbound::{Direction, InboundMessage, ReplyTarget};
pub use messagebird::MessageBirdChannel;
pub use payload::{normalize, Rejection, WebhookPayload};
