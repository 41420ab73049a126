//! Per-request webhook pipeline: normalize → fetch context → generate reply → dispatch → acknowledge.
//!
//! Every path ends in `Acknowledged`; rejections and stage failures are logged and counted, never
//! surfaced to the platform (a non-2xx makes the platform redeliver the webhook).

use crate::channels::{
    normalize, DispatchError, InboundMessage, Rejection, ReplyDispatcher, ReplyTarget,
};
use crate::config::{Config, TimeoutsConfig, WebhookConfig};
use crate::llm::CompletionBackend;
use crate::reply::{generate_reply, GenerationError, ReplyRequest};
use crate::retrieval::{retrieve_context, ContextStore, RetrievalError};
use axum::http::HeaderMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// States of one webhook request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Normalized,
    ContextFetched,
    ReplyGenerated,
    Dispatched,
    Acknowledged,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Received => "received",
            Stage::Normalized => "normalized",
            Stage::ContextFetched => "context-fetched",
            Stage::ReplyGenerated => "reply-generated",
            Stage::Dispatched => "dispatched",
            Stage::Acknowledged => "acknowledged",
        };
        f.write_str(s)
    }
}

/// Failure after normalization. Payload problems are [`Rejection`]s and never reach here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("message has no conversation id or sender to reply to")]
    NoReplyTarget,
}

impl PipelineError {
    /// The stage that was being entered when the failure happened.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::NoReplyTarget => Stage::Normalized,
            PipelineError::Retrieval(_) => Stage::ContextFetched,
            PipelineError::Generation(_) => Stage::ReplyGenerated,
            PipelineError::Dispatch(_) => Stage::Dispatched,
        }
    }
}

/// How a webhook request ended. The HTTP response is 200 in every case.
#[derive(Debug)]
pub enum Outcome {
    Ignored(Rejection),
    Replied(ReplyTarget),
    Failed(PipelineError),
}

/// Counters since startup, reported on the health endpoint.
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    unparseable: AtomicU64,
    ignored: AtomicU64,
    replied: AtomicU64,
    retrieval_failures: AtomicU64,
    generation_failures: AtomicU64,
    dispatch_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub unparseable: u64,
    pub ignored: u64,
    pub replied: u64,
    pub failures: FailureCounts,
}

/// Failures after normalization, per stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    pub retrieval: u64,
    pub generation: u64,
    pub dispatch: u64,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, err: &PipelineError) {
        match err {
            PipelineError::Retrieval(_) => Self::bump(&self.retrieval_failures),
            PipelineError::Generation(_) => Self::bump(&self.generation_failures),
            PipelineError::Dispatch(_) => Self::bump(&self.dispatch_failures),
            PipelineError::NoReplyTarget => Self::bump(&self.ignored),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            unparseable: self.unparseable.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            replied: self.replied.load(Ordering::Relaxed),
            failures: FailureCounts {
                retrieval: self.retrieval_failures.load(Ordering::Relaxed),
                generation: self.generation_failures.load(Ordering::Relaxed),
                dispatch: self.dispatch_failures.load(Ordering::Relaxed),
            },
        }
    }
}

/// The webhook pipeline with its injected collaborators.
pub struct Pipeline {
    store: Arc<dyn ContextStore>,
    backend: Arc<dyn CompletionBackend>,
    dispatcher: Arc<dyn ReplyDispatcher>,
    model: String,
    webhook: WebhookConfig,
    timeouts: TimeoutsConfig,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ContextStore>,
        backend: Arc<dyn CompletionBackend>,
        dispatcher: Arc<dyn ReplyDispatcher>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            backend,
            dispatcher,
            model: config.completion.model.clone(),
            webhook: config.webhook.clone(),
            timeouts: config.timeouts.clone(),
            stats: PipelineStats::default(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run one webhook request to completion. Never fails; the outcome is for logging and tests.
    pub async fn handle(&self, headers: &HeaderMap, body: &[u8]) -> Outcome {
        PipelineStats::bump(&self.stats.received);
        log::info!("webhook: received {} byte body", body.len());
        log::debug!("webhook: raw body: {}", String::from_utf8_lossy(body));

        let msg = match normalize(headers, body, &self.webhook) {
            Ok(msg) => msg,
            Err(rejection) => {
                if let Rejection::Unparseable(_) = rejection {
                    PipelineStats::bump(&self.stats.unparseable);
                    log::warn!("webhook: {}; acknowledging", rejection);
                } else {
                    PipelineStats::bump(&self.stats.ignored);
                    log::info!("webhook: not a processable message ({}); acknowledging", rejection);
                }
                log::debug!("webhook: {} -> {}", Stage::Received, Stage::Acknowledged);
                return Outcome::Ignored(rejection);
            }
        };
        log::info!(
            "webhook: message from {} in conversation {}",
            msg.sender.as_deref().unwrap_or("-"),
            msg.conversation_id.as_deref().unwrap_or("-"),
        );

        let outcome = match self.answer(&msg).await {
            Ok(target) => {
                PipelineStats::bump(&self.stats.replied);
                log::info!("webhook: reply sent to {}", target);
                Outcome::Replied(target)
            }
            Err(e) => {
                self.stats.record_failure(&e);
                log::error!("webhook: stage {} failed: {}", e.stage(), e);
                Outcome::Failed(e)
            }
        };
        log::debug!("webhook: {}", Stage::Acknowledged);
        outcome
    }

    /// A body that could not be read (too large or the connection broke). Counted like an unparseable payload.
    pub fn reject_unreadable(&self, reason: impl std::fmt::Display) -> Outcome {
        PipelineStats::bump(&self.stats.received);
        PipelineStats::bump(&self.stats.unparseable);
        let rejection = Rejection::Unparseable(format!("body unreadable: {}", reason));
        log::warn!("webhook: {}; acknowledging", rejection);
        Outcome::Ignored(rejection)
    }

    /// Context lookup and completion only; nothing is sent.
    pub async fn draft_reply(&self, text: &str) -> Result<String, PipelineError> {
        let context = retrieve_context(self.store.as_ref(), text, self.timeouts.database()).await?;
        log::debug!("webhook: {}", Stage::ContextFetched);
        let request = ReplyRequest::new(context, text);
        let reply = generate_reply(
            self.backend.as_ref(),
            &self.model,
            &request,
            self.timeouts.completion(),
        )
        .await?;
        log::debug!("webhook: {}", Stage::ReplyGenerated);
        Ok(reply)
    }

    /// Draft a reply for `msg` and deliver it; returns where it went.
    pub async fn answer(&self, msg: &InboundMessage) -> Result<ReplyTarget, PipelineError> {
        let target = msg.reply_target().ok_or(PipelineError::NoReplyTarget)?;
        let reply = self.draft_reply(&msg.text).await?;
        log::info!("dispatch: sending reply to {}", target);
        let timeout = self.timeouts.dispatch();
        tokio::time::timeout(timeout, self.dispatcher.send_reply(&target, &reply))
            .await
            .map_err(|_| DispatchError::Timeout(timeout))??;
        log::debug!("webhook: {}", Stage::Dispatched);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_stage_mapping() {
        let e = PipelineError::Retrieval(RetrievalError::Timeout(std::time::Duration::from_secs(1)));
        assert_eq!(e.stage(), Stage::ContextFetched);
        let e = PipelineError::Generation(GenerationError::NoChoices);
        assert_eq!(e.stage(), Stage::ReplyGenerated);
        let e = PipelineError::Dispatch(DispatchError::MissingApiKey);
        assert_eq!(e.stage(), Stage::Dispatched);
        assert_eq!(Stage::ContextFetched.to_string(), "context-fetched");
    }

    #[test]
    fn failures_are_counted_per_stage() {
        let stats = PipelineStats::default();
        stats.record_failure(&PipelineError::Dispatch(DispatchError::MissingApiKey));
        stats.record_failure(&PipelineError::Generation(GenerationError::NoChoices));
        stats.record_failure(&PipelineError::Generation(GenerationError::MissingContent));
        let snap = stats.snapshot();
        assert_eq!(
            snap.failures,
            FailureCounts {
                retrieval: 0,
                generation: 2,
                dispatch: 1,
            }
        );
    }

    #[test]
    fn stats_serialize_with_nested_failures() {
        let stats = PipelineStats::default();
        stats.record_failure(&PipelineError::Retrieval(RetrievalError::Timeout(
            std::time::Duration::from_secs(5),
        )));
        let value = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(value["failures"]["retrieval"], 1);
        assert_eq!(value["failures"]["dispatch"], 0);
        assert_eq!(value["unparseable"], 0);
        assert!(value.get("retrievalFailures").is_none());
    }
}
