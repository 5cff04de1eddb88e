//! Exponential backoff around store writes.
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```
//!
//! Only `upsert` is retried. Reads pass straight through.

use super::{ArticleStore, StoreError};
use crate::config::PersistenceConfig;
use crate::models::{ArticleRecord, Fingerprint, StoredArticle, UpsertOutcome};
use async_trait::async_trait;
use rand::{Rng, rng};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

/// Decorator that retries failed upserts of the wrapped store.
pub struct RetryStore<S> {
    inner: S,
    /// Retries after the first attempt.
    max_retries: usize,
    /// Delay before the first retry; doubles on each further attempt.
    base_delay: Duration,
    max_delay: Duration,
}

impl<S> RetryStore<S>
where
    S: ArticleStore,
{
    pub fn new(inner: S, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    pub fn from_config(inner: S, config: &PersistenceConfig) -> Self {
        Self {
            inner,
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(31) as u32;
        let delay = self.base_delay.saturating_mul(1u32 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + Duration::from_millis(jitter_ms)
    }
}

impl<S> fmt::Debug for RetryStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryStore")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

#[async_trait]
impl<S> ArticleStore for RetryStore<S>
where
    S: ArticleStore,
{
    async fn find_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<StoredArticle>, StoreError> {
        self.inner.find_by_fingerprint(fingerprint).await
    }

    #[instrument(level = "debug", skip_all, fields(fingerprint = %record.fingerprint))]
    async fn upsert(&self, record: &ArticleRecord) -> Result<UpsertOutcome, StoreError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.upsert(record).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    attempt += 1;
                    let elapsed_ms_total = total_t0.elapsed().as_millis();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total,
                            error = %e,
                            "upsert exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_total,
                        ?delay,
                        error = %e,
                        "upsert failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.inner.count().await
    }
}
