//! Context retrieval: best trigram-similarity match from the `documents` table.
//!
//! Ranking is the database's: `content % $1` with `LIMIT 1`, first row in the store's own order.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;

/// Context used when nothing in the store matches.
pub const NO_CONTEXT: &str = "No relevant context found.";

const BEST_MATCH_SQL: &str = "SELECT content FROM documents WHERE content % $1 LIMIT 1";

/// One stored document's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnippet {
    pub content: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("context lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Read-only document store queried by similarity.
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn best_match(&self, text: &str) -> Result<Option<ContextSnippet>, RetrievalError>;
}

/// Postgres store; requires the `pg_trgm` extension for the `%` operator.
#[derive(Clone, Debug)]
pub struct PgContextStore {
    pool: PgPool,
}

impl PgContextStore {
    /// Build a pool without connecting; connections open on first use.
    /// `acquire_timeout` bounds how long a request waits for a free connection.
    pub fn connect_lazy(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, RetrievalError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(acquire_timeout)
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl ContextStore for PgContextStore {
    async fn best_match(&self, text: &str) -> Result<Option<ContextSnippet>, RetrievalError> {
        // The pooled connection goes back to the pool when `conn` drops, on success and on error.
        let mut conn = self.pool.acquire().await?;
        log::debug!("retrieval: connection acquired");
        let row = sqlx::query(BEST_MATCH_SQL)
            .bind(text)
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => Ok(Some(ContextSnippet {
                content: row.try_get("content")?,
            })),
            None => Ok(None),
        }
    }
}

/// Look up context for `text`, bounded by `timeout`. No match yields [`NO_CONTEXT`].
pub async fn retrieve_context(
    store: &dyn ContextStore,
    text: &str,
    timeout: Duration,
) -> Result<String, RetrievalError> {
    let found = tokio::time::timeout(timeout, store.best_match(text))
        .await
        .map_err(|_| RetrievalError::Timeout(timeout))??;
    match found {
        Some(snippet) => {
            log::info!("retrieval: found context ({} chars)", snippet.content.len());
            Ok(snippet.content)
        }
        None => {
            log::info!("retrieval: no context found for message");
            Ok(NO_CONTEXT.to_string())
        }
    }
}
