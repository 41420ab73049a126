//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `./ragreply.json`) and environment.
//! Secrets and the database URL are normally supplied through the environment; see the `resolve_*` helpers.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash-lite-preview-06-17";
pub const DEFAULT_COMPLETION_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_CONVERSATIONS_BASE_URL: &str = "https://conversations.messagebird.com/v1";
pub const DEFAULT_REST_BASE_URL: &str = "https://rest.messagebird.com";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Which inbound payload shapes the webhook accepts.
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Messaging platform (MessageBird) credentials and endpoints.
    #[serde(default)]
    pub messaging: MessagingConfig,

    /// Completion provider (OpenRouter) credentials, model and site headers.
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Postgres document store.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Upper bounds for the three external calls.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

/// Bind address and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 8080). Overridden by PORT env.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0"; the platform must be able to reach the webhook).
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Accept a non-JSON body as the message text (Flow Builder "Call API" step), with the sender
    /// taken from the X-MessageBird-Originator header. When false, non-JSON bodies are rejected as unparseable.
    #[serde(default)]
    pub accept_raw_text: bool,

    /// Largest body read from a webhook (default 8 MiB). Larger bodies are acknowledged and counted as unparseable.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_body_bytes() -> usize {
    8 * 1024 * 1024
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            accept_raw_text: false,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// MessageBird settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagingConfig {
    /// Access key. Overridden by MESSAGEBIRD_API_KEY env.
    pub api_key: Option<String>,
    /// Originator for legacy address-based sends. Overridden by MESSAGEBIRD_CHANNEL_ID env.
    pub channel_id: Option<String>,
    #[serde(default = "default_conversations_base_url")]
    pub conversations_base_url: String,
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,
}

fn default_conversations_base_url() -> String {
    DEFAULT_CONVERSATIONS_BASE_URL.to_string()
}

fn default_rest_base_url() -> String {
    DEFAULT_REST_BASE_URL.to_string()
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            channel_id: None,
            conversations_base_url: default_conversations_base_url(),
            rest_base_url: default_rest_base_url(),
        }
    }
}

/// OpenRouter (OpenAI-compatible) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionConfig {
    /// API key. Overridden by OPENROUTER_API_KEY env.
    pub api_key: Option<String>,
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,
    /// Model id passed as-is to the provider.
    #[serde(default = "default_model")]
    pub model: String,
    /// Sent as HTTP-Referer for provider-side attribution. Overridden by YOUR_SITE_URL env.
    pub site_url: Option<String>,
    /// Sent as X-Title. Overridden by YOUR_SITE_NAME env.
    pub site_name: Option<String>,
}

fn default_completion_base_url() -> String {
    DEFAULT_COMPLETION_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_completion_base_url(),
            model: default_model(),
            site_url: None,
            site_name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Postgres connection string. Overridden by DATABASE_URL env.
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Timeouts in seconds for database, completion and dispatch calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutsConfig {
    #[serde(default = "default_database_secs")]
    pub database_secs: u64,
    #[serde(default = "default_completion_secs")]
    pub completion_secs: u64,
    #[serde(default = "default_dispatch_secs")]
    pub dispatch_secs: u64,
}

fn default_database_secs() -> u64 {
    5
}

fn default_completion_secs() -> u64 {
    30
}

fn default_dispatch_secs() -> u64 {
    10
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            database_secs: default_database_secs(),
            completion_secs: default_completion_secs(),
            dispatch_secs: default_dispatch_secs(),
        }
    }
}

impl TimeoutsConfig {
    pub fn database(&self) -> Duration {
        Duration::from_secs(self.database_secs.max(1))
    }

    pub fn completion(&self) -> Duration {
        Duration::from_secs(self.completion_secs.max(1))
    }

    pub fn dispatch(&self) -> Duration {
        Duration::from_secs(self.dispatch_secs.max(1))
    }
}

/// Non-empty trimmed env var, if set.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolve the MessageBird access key: env MESSAGEBIRD_API_KEY overrides config.
pub fn resolve_messaging_api_key(config: &Config) -> Option<String> {
    env_value("MESSAGEBIRD_API_KEY").or_else(|| non_empty(config.messaging.api_key.as_ref()))
}

/// Resolve the legacy-send originator: env MESSAGEBIRD_CHANNEL_ID overrides config.
pub fn resolve_messaging_channel_id(config: &Config) -> Option<String> {
    env_value("MESSAGEBIRD_CHANNEL_ID").or_else(|| non_empty(config.messaging.channel_id.as_ref()))
}

/// Resolve the OpenRouter key: env OPENROUTER_API_KEY overrides config.
pub fn resolve_completion_api_key(config: &Config) -> Option<String> {
    env_value("OPENROUTER_API_KEY").or_else(|| non_empty(config.completion.api_key.as_ref()))
}

/// Resolve (site url, site name) headers: env YOUR_SITE_URL / YOUR_SITE_NAME override config.
pub fn resolve_site_headers(config: &Config) -> (Option<String>, Option<String>) {
    let url = env_value("YOUR_SITE_URL").or_else(|| non_empty(config.completion.site_url.as_ref()));
    let name =
        env_value("YOUR_SITE_NAME").or_else(|| non_empty(config.completion.site_name.as_ref()));
    (url, name)
}

/// Resolve the database URL: env DATABASE_URL overrides config.
pub fn resolve_database_url(config: &Config) -> Option<String> {
    env_value("DATABASE_URL").or_else(|| non_empty(config.database.url.as_ref()))
}

/// Resolve the listen port: env PORT overrides config when it parses.
pub fn resolve_port(config: &Config) -> u16 {
    env_value("PORT")
        .and_then(|p| p.parse().ok())
        .unwrap_or(config.gateway.port)
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RAGREPLY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("ragreply.json"))
}

/// Load config from the given path (or RAGREPLY_CONFIG_PATH, or ./ragreply.json). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Write a default config to `path` unless a file already exists there. Returns true when written.
pub fn write_default_config(path: &std::path::Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(&Config::default())?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(true)
}
