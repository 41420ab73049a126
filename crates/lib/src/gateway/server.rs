//! Gateway HTTP server: `POST /webhook` and a health check on `GET /`.

use crate::channels::MessageBirdChannel;
use crate::config::{self, Config};
use crate::gateway::pipeline::Pipeline;
use crate::llm::OpenRouterClient;
use crate::retrieval::PgContextStore;
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use futures_util::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Body of every webhook acknowledgement.
pub const ACK_BODY: &str = "OK";

/// Shared state for the gateway (config and the pipeline with its clients).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub pipeline: Arc<Pipeline>,
}

impl GatewayState {
    pub fn new(config: Config, pipeline: Pipeline) -> Self {
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
        }
    }
}

/// Routes: `GET /` health, `POST /webhook`. Other methods on `/webhook` get 405 from the method router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/webhook", post(webhook))
        .with_state(state)
}

/// Build the production clients from config (Postgres pool, OpenRouter, MessageBird).
/// The pool is lazy: connections open on the first webhook, so a briefly unreachable database does not block startup.
pub fn build_state(config: Config) -> Result<GatewayState> {
    let database_url = config::resolve_database_url(&config)
        .context("database url not configured (set DATABASE_URL or database.url)")?;
    let store = PgContextStore::connect_lazy(
        &database_url,
        config.database.max_connections,
        config.timeouts.database(),
    )
    .context("creating postgres pool")?;
    if config::resolve_completion_api_key(&config).is_none() {
        log::warn!("OPENROUTER_API_KEY not set; every reply will fail at generation");
    }
    if config::resolve_messaging_api_key(&config).is_none() {
        log::warn!("MESSAGEBIRD_API_KEY not set; every reply will fail at dispatch");
    }
    let backend = OpenRouterClient::from_config(&config).context("building completion client")?;
    let dispatcher = MessageBirdChannel::from_config(&config).context("building messaging client")?;
    let pipeline = Pipeline::new(
        Arc::new(store),
        Arc::new(backend),
        Arc::new(dispatcher),
        &config,
    );
    Ok(GatewayState::new(config, pipeline))
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Blocks until shutdown (Ctrl+C or SIGTERM).
pub async fn run_gateway(config: Config) -> Result<()> {
    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let state = build_state(config)?;
    log::info!("completion model: {}", state.pipeline.model());
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining in-flight webhooks");
}

/// POST /webhook — runs the pipeline to completion, then acknowledges with 200 whatever happened.
/// The body is read against `webhook.maxBodyBytes` here rather than axum's default extractor limit,
/// so an oversized body is counted as unparseable instead of answered with 413.
async fn webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Body,
) -> (StatusCode, &'static str) {
    let body = match axum::body::to_bytes(body, state.config.webhook.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            state.pipeline.reject_unreadable(e);
            return (StatusCode::OK, ACK_BODY);
        }
    };
    let run = state.pipeline.handle(&headers, &body);
    if AssertUnwindSafe(run).catch_unwind().await.is_err() {
        log::error!("webhook: pipeline panicked; acknowledging anyway");
    }
    (StatusCode::OK, ACK_BODY)
}

/// GET / returns a health JSON with pipeline counters (for health checks and failure alerting).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
        "model": state.pipeline.model(),
        "stats": state.pipeline.stats(),
    }))
}
