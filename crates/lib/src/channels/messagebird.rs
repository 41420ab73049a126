//! MessageBird channel: conversation-reply (Conversations API) and legacy address-based send (REST messages API).

use crate::channels::dispatch::{DispatchError, ReplyDispatcher};
use crate::channels::inbound::ReplyTarget;
use crate::config::{self, Config};
use async_trait::async_trait;
use serde::Serialize;

/// Conversations API message body: `{"type":"text","content":{"text":...}}`.
#[derive(Debug, Serialize)]
struct ConversationReply<'a> {
    #[serde(rename = "type")]
    typ: &'static str,
    content: TextContent<'a>,
}

#[derive(Debug, Serialize)]
struct TextContent<'a> {
    text: &'a str,
}

/// Legacy REST messages body.
#[derive(Debug, Serialize)]
struct LegacyMessage<'a> {
    originator: &'a str,
    recipients: [&'a str; 1],
    body: &'a str,
}

/// MessageBird connector for outbound replies.
#[derive(Clone)]
pub struct MessageBirdChannel {
    api_key: Option<String>,
    channel_id: Option<String>,
    conversations_base_url: String,
    rest_base_url: String,
    client: reqwest::Client,
}

impl MessageBirdChannel {
    pub fn new(
        api_key: Option<String>,
        channel_id: Option<String>,
        conversations_base_url: &str,
        rest_base_url: &str,
    ) -> Self {
        Self {
            api_key,
            channel_id,
            conversations_base_url: conversations_base_url.trim_end_matches('/').to_string(),
            rest_base_url: rest_base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from config, resolving the key and originator from env first.
    pub fn from_config(config: &Config) -> Result<Self, DispatchError> {
        let mut channel = Self::new(
            config::resolve_messaging_api_key(config),
            config::resolve_messaging_channel_id(config),
            &config.messaging.conversations_base_url,
            &config.messaging.rest_base_url,
        );
        channel.client = reqwest::Client::builder()
            .timeout(config.timeouts.dispatch())
            .build()?;
        Ok(channel)
    }

    fn api_key(&self) -> Result<&str, DispatchError> {
        self.api_key.as_deref().ok_or(DispatchError::MissingApiKey)
    }

    /// `{base}/conversations/{id}/messages` with the id percent-encoded as a single path segment.
    fn conversation_url(&self, conversation_id: &str) -> Result<reqwest::Url, DispatchError> {
        if matches!(conversation_id, "" | "." | "..") {
            return Err(DispatchError::InvalidConversationId(conversation_id.to_string()));
        }
        let base = &self.conversations_base_url;
        let mut url = reqwest::Url::parse(base)
            .map_err(|e| DispatchError::InvalidBaseUrl(format!("{}: {}", base, e)))?;
        url.path_segments_mut()
            .map_err(|_| DispatchError::InvalidBaseUrl(base.clone()))?
            .pop_if_empty()
            .extend(["conversations", conversation_id, "messages"]);
        Ok(url)
    }

    /// POST /conversations/{id}/messages — reply inside an existing conversation.
    pub async fn reply_in_conversation(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<(), DispatchError> {
        let key = self.api_key()?;
        let url = self.conversation_url(conversation_id)?;
        let body = ConversationReply {
            typ: "text",
            content: TextContent { text },
        };
        let res = self
            .client
            .post(url)
            .header("Authorization", format!("AccessKey {}", key))
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(DispatchError::Api(format!("conversation reply: {} {}", status, body)));
        }
        Ok(())
    }

    /// POST /messages — legacy send addressed to a recipient, from the configured originator.
    pub async fn send_to_recipient(&self, recipient: &str, text: &str) -> Result<(), DispatchError> {
        let key = self.api_key()?;
        let originator = self
            .channel_id
            .as_deref()
            .ok_or(DispatchError::MissingOriginator)?;
        let url = format!("{}/messages", self.rest_base_url);
        let body = LegacyMessage {
            originator,
            recipients: [recipient],
            body: text,
        };
        let res = self
            .client
            .post(&url)
            .header("Authorization", format!("AccessKey {}", key))
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(DispatchError::Api(format!("send message: {} {}", status, body)));
        }
        Ok(())
    }
}

#[async_trait]
impl ReplyDispatcher for MessageBirdChannel {
    async fn send_reply(&self, target: &ReplyTarget, text: &str) -> Result<(), DispatchError> {
        match target {
            ReplyTarget::Conversation(id) => self.reply_in_conversation(id, text).await,
            ReplyTarget::Recipient(to) => self.send_to_recipient(to, text).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_reply_body_shape() {
        let body = ConversationReply {
            typ: "text",
            content: TextContent { text: "hi there" },
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({ "type": "text", "content": { "text": "hi there" } })
        );
    }

    #[test]
    fn legacy_body_shape() {
        let body = LegacyMessage {
            originator: "chan-1",
            recipients: ["+31600000000"],
            body: "hi",
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({ "originator": "chan-1", "recipients": ["+31600000000"], "body": "hi" })
        );
    }

    #[test]
    fn conversation_id_stays_one_path_segment() {
        let channel =
            MessageBirdChannel::new(None, None, "https://conversations.test/v1/", "http://127.0.0.1:9");
        let url = channel.conversation_url("conv-1").unwrap();
        assert_eq!(url.as_str(), "https://conversations.test/v1/conversations/conv-1/messages");

        let url = channel.conversation_url("a/../../admin?x=1#f").unwrap();
        assert_eq!(url.path_segments().map(|s| s.count()), Some(4));
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());
        assert!(url.path().ends_with("/messages"));
        assert!(!url.path().contains("/admin"));
    }

    #[test]
    fn dot_segments_are_rejected_as_conversation_ids() {
        let channel =
            MessageBirdChannel::new(None, None, "https://conversations.test/v1", "http://127.0.0.1:9");
        for id in ["", ".", ".."] {
            assert!(matches!(
                channel.conversation_url(id),
                Err(DispatchError::InvalidConversationId(_))
            ));
        }
    }

    #[test]
    fn from_config_builds_client() {
        let config = Config::default();
        assert!(MessageBirdChannel::from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let channel = MessageBirdChannel::new(None, None, "http://127.0.0.1:9", "http://127.0.0.1:9");
        let err = channel
            .send_reply(&ReplyTarget::Conversation("c1".to_string()), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::MissingApiKey));
    }

    #[tokio::test]
    async fn legacy_send_requires_originator() {
        let channel = MessageBirdChannel::new(
            Some("k".to_string()),
            None,
            "http://127.0.0.1:9",
            "http://127.0.0.1:9",
        );
        let err = channel
            .send_reply(&ReplyTarget::Recipient("+1".to_string()), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::MissingOriginator));
    }
}
