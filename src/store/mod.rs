//! Fingerprint-keyed article persistence.
//!
//! Articles are deduplicated by [`Fingerprint`], the MD5 of their trimmed body
//! text. Saving an article whose fingerprint is already stored updates that
//! row in place, so re-crawling unchanged content any number of times leaves
//! exactly one row with a stable surrogate id.
//!
//! # Layers
//!
//! - [`ArticleStore`]: storage backend ([`PgArticleStore`], [`MemoryArticleStore`])
//! - [`RetryStore`]: backoff decorator around any backend
//! - [`Persister`]: fingerprints raw articles, upserts, and dead-letters
//!   records that still fail after retries
//!
//! # Concurrent writers
//!
//! Both backends make the upsert atomic per fingerprint: Postgres through the
//! unique index on `md5` and `ON CONFLICT`, the memory store through a single
//! lock. Two workers saving the same content therefore never produce two rows.

pub mod memory;
pub mod postgres;
pub mod retry;

pub use memory::MemoryArticleStore;
pub use postgres::PgArticleStore;
pub use retry::RetryStore;

use crate::error::{CrawlError, Result};
use crate::models::{ArticleRecord, Fingerprint, RawArticle, StoredArticle, UpsertOutcome};
use crate::outputs::dead_letter::DeadLetterSink;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Storage backend for articles.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn find_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> std::result::Result<Option<StoredArticle>, StoreError>;

    /// Insert `record`, or update the row that already carries its fingerprint.
    async fn upsert(&self, record: &ArticleRecord) -> std::result::Result<UpsertOutcome, StoreError>;

    async fn count(&self) -> std::result::Result<u64, StoreError>;
}

#[async_trait]
impl<S: ArticleStore + ?Sized> ArticleStore for Arc<S> {
    async fn find_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> std::result::Result<Option<StoredArticle>, StoreError> {
        (**self).find_by_fingerprint(fingerprint).await
    }

    async fn upsert(&self, record: &ArticleRecord) -> std::result::Result<UpsertOutcome, StoreError> {
        (**self).upsert(record).await
    }

    async fn count(&self) -> std::result::Result<u64, StoreError> {
        (**self).count().await
    }
}

/// Turns extracted articles into stored rows.
pub struct Persister {
    store: Arc<dyn ArticleStore>,
    dead_letter: Option<DeadLetterSink>,
}

impl Persister {
    pub fn new(store: Arc<dyn ArticleStore>) -> Self {
        Self {
            store,
            dead_letter: None,
        }
    }

    pub fn with_dead_letter(mut self, sink: DeadLetterSink) -> Self {
        self.dead_letter = Some(sink);
        self
    }

    /// Fingerprint `raw` and upsert it.
    ///
    /// Articles with blank content are rejected without touching the store.
    /// When the store still fails after its retries, the record is appended
    /// to the dead-letter file (if configured) and the failure is returned.
    #[instrument(level = "info", skip_all, fields(url = %raw.url))]
    pub async fn save(&self, raw: RawArticle) -> Result<UpsertOutcome> {
        if raw.content.trim().is_empty() {
            return Err(CrawlError::ExtractionEmpty { url: raw.url });
        }
        let url = raw.url.clone();
        let record = ArticleRecord::from_raw(raw);

        match self.store.upsert(&record).await {
            Ok(outcome) => {
                info!(
                    id = %outcome.id,
                    fingerprint = %record.fingerprint,
                    inserted = outcome.inserted,
                    "Saved article"
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(fingerprint = %record.fingerprint, error = %e, "Persisting article failed");
                if let Some(sink) = &self.dead_letter {
                    match sink.write(&url, &record, &e.to_string()).await {
                        Ok(path) => info!(path = %path.display(), "Article dead-lettered"),
                        Err(io) => error!(error = %io, "Dead-letter write failed; article lost"),
                    }
                }
                Err(CrawlError::Persistence {
                    fingerprint: record.fingerprint.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
