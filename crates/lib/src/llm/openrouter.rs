//! OpenRouter client (OpenAI-compatible API at https://openrouter.ai/api/v1 by default).
//! Non-streaming `/chat/completions` only; no retries and no fallback model.

use crate::config::{self, Config, DEFAULT_COMPLETION_BASE_URL};
use crate::llm::{ChatCompletion, ChatMessage, CompletionBackend, LlmError};
use async_trait::async_trait;
use serde::Serialize;

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenRouterClient {
    base_url: String,
    api_key: Option<String>,
    site_url: Option<String>,
    site_name: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

impl OpenRouterClient {
    pub fn new(base_url: Option<String>, api_key: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_COMPLETION_BASE_URL.to_string());
        Self {
            base_url,
            api_key,
            site_url: None,
            site_name: None,
            client: reqwest::Client::new(),
        }
    }

    /// Optional attribution headers (HTTP-Referer, X-Title).
    pub fn with_site(mut self, site_url: Option<String>, site_name: Option<String>) -> Self {
        self.site_url = site_url;
        self.site_name = site_name;
        self
    }

    /// Build from config, resolving the key and site headers from env first.
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        let (site_url, site_name) = config::resolve_site_headers(config);
        let mut client = Self::new(
            Some(config.completion.base_url.clone()),
            config::resolve_completion_api_key(config),
        )
        .with_site(site_url, site_name);
        client.client = reqwest::Client::builder()
            .timeout(config.timeouts.completion())
            .build()?;
        Ok(client)
    }

    /// POST /chat/completions — non-streaming chat.
    pub async fn chat(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<ChatCompletion, LlmError> {
        let key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest { model, messages };
        let mut req = self.client.post(&url).bearer_auth(key).json(&body);
        if let Some(ref site) = self.site_url {
            req = req.header("HTTP-Referer", site);
        }
        if let Some(ref name) = self.site_name {
            req = req.header("X-Title", name);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{} {}", status, body)));
        }
        let data: ChatCompletion = res.json().await?;
        Ok(data)
    }
}

#[async_trait]
impl CompletionBackend for OpenRouterClient {
    async fn complete(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<ChatCompletion, LlmError> {
        self.chat(model, messages).await
    }
}
