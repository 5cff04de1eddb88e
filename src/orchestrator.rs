//! Crawl orchestration.
//!
//! Jobs expand into an ordered queue of crawl units, one per `(job, page)`.
//! A bounded pool of workers drains the queue; each unit is self-contained:
//!
//! 1. lease a proxy address
//! 2. open a render session bound to it
//! 3. list the page's article links
//! 4. extract and persist every article, reusing the session
//! 5. close the session
//!
//! A unit that cannot get a proxy or load its listing page is logged and
//! skipped. An article that fails to load, has no content, or cannot be
//! persisted is logged and the unit moves on to the next link. A render
//! engine that fails before any session has opened, or fails
//! [`MAX_CONSECUTIVE_LAUNCH_FAILURES`] times in a row, stops the run.
//!
//! Cancellation is checked before each unit and each article. Page loads are
//! abandoned as soon as the token fires; a save that has started always runs
//! to completion, so an extracted article is either stored or dead-lettered.
//!
//! There is no checkpointing: a stopped run restarts from each job's start
//! page, which is safe because saves are idempotent.

use crate::error::{CrawlError, Result};
use crate::extractor::ArticleExtractor;
use crate::listing::ListingTraversal;
use crate::models::{CrawlJob, CrawlUnit, ProxyEndpoint};
use crate::proxy::ProxySource;
use crate::render::{RenderEngine, SessionGuard};
use crate::store::Persister;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Launch failures in a row, after at least one session has opened, that stop the run.
pub const MAX_CONSECUTIVE_LAUNCH_FAILURES: usize = 3;

/// Collaborators shared by every worker.
pub struct CrawlContext {
    pub proxies: Arc<dyn ProxySource>,
    pub engine: Arc<dyn RenderEngine>,
    pub persister: Arc<Persister>,
    pub listing: ListingTraversal,
    pub extractor: ArticleExtractor,
    /// Allocator calls a unit makes before it is skipped.
    pub proxy_attempts: u32,
    pub cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct CrawlStats {
    units: AtomicUsize,
    units_failed: AtomicUsize,
    units_skipped: AtomicUsize,
    units_cancelled: AtomicUsize,
    links: AtomicUsize,
    inserted: AtomicUsize,
    updated: AtomicUsize,
    discarded: AtomicUsize,
    navigation_failures: AtomicUsize,
    persistence_failures: AtomicUsize,
    sessions_rotated: AtomicUsize,
    sessions_opened: AtomicUsize,
    launch_failures_in_a_row: AtomicUsize,
}

impl CrawlStats {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a launch failure and report whether the engine should be given up on.
    fn engine_gave_up(&self) -> bool {
        let in_a_row = self.launch_failures_in_a_row.fetch_add(1, Ordering::Relaxed) + 1;
        self.sessions_opened.load(Ordering::Relaxed) == 0
            || in_a_row >= MAX_CONSECUTIVE_LAUNCH_FAILURES
    }

    fn summary(&self, cancelled: bool) -> CrawlSummary {
        CrawlSummary {
            units: self.units.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            units_skipped: self.units_skipped.load(Ordering::Relaxed),
            units_cancelled: self.units_cancelled.load(Ordering::Relaxed),
            links: self.links.load(Ordering::Relaxed),
            inserted: self.inserted.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            navigation_failures: self.navigation_failures.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            sessions_rotated: self.sessions_rotated.load(Ordering::Relaxed),
            cancelled,
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Units that ran to completion.
    pub units: usize,
    /// Units abandoned for lack of a proxy, session or listing page.
    pub units_failed: usize,
    /// Units never started because the run was cancelled.
    pub units_skipped: usize,
    /// Units interrupted by cancellation after they had started.
    pub units_cancelled: usize,
    pub links: usize,
    pub inserted: usize,
    pub updated: usize,
    pub discarded: usize,
    pub navigation_failures: usize,
    pub persistence_failures: usize,
    pub sessions_rotated: usize,
    pub cancelled: bool,
}

impl CrawlSummary {
    pub fn saved(&self) -> usize {
        self.inserted + self.updated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitEnd {
    Completed,
    Cancelled,
}

pub struct CrawlOrchestrator {
    ctx: CrawlContext,
    workers: usize,
}

impl CrawlOrchestrator {
    pub fn new(ctx: CrawlContext, workers: usize) -> Self {
        Self {
            ctx,
            workers: workers.max(1),
        }
    }

    /// Every `(job, page)` pair, jobs in order, pages ascending.
    pub fn units(jobs: &[CrawlJob]) -> Vec<CrawlUnit> {
        jobs.iter()
            .map(|job| Arc::new(job.clone()))
            .flat_map(|job| {
                job.pages().map(move |page_no| CrawlUnit {
                    job: Arc::clone(&job),
                    page_no,
                })
            })
            .collect()
    }

    /// Crawl every page of every job.
    ///
    /// Returns an error only when the render engine cannot be started; all
    /// other failures, including an isolated launch failure on an engine
    /// that has worked before, are counted in the summary.
    #[instrument(level = "info", skip_all, fields(jobs = jobs.len(), workers = self.workers))]
    pub async fn run(&self, jobs: &[CrawlJob]) -> Result<CrawlSummary> {
        let started = Instant::now();
        let units = Self::units(jobs);
        info!(units = units.len(), "Starting crawl");

        let stats = CrawlStats::default();
        let fatal: Mutex<Option<CrawlError>> = Mutex::new(None);

        {
            let this = self;
            let stats = &stats;
            let fatal = &fatal;
            stream::iter(units)
                .for_each_concurrent(self.workers, |unit| async move {
                    if this.ctx.cancel.is_cancelled() {
                        CrawlStats::bump(&stats.units_skipped);
                        return;
                    }
                    match this.run_unit(&unit, stats).await {
                        Ok(UnitEnd::Completed) => CrawlStats::bump(&stats.units),
                        Ok(UnitEnd::Cancelled) => CrawlStats::bump(&stats.units_cancelled),
                        Err(e) if e.is_fatal() && stats.engine_gave_up() => {
                            error!(error = %e, "Render engine unusable; stopping crawl");
                            let mut slot = fatal.lock().unwrap_or_else(|p| p.into_inner());
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                            this.ctx.cancel.cancel();
                        }
                        Err(e) => {
                            CrawlStats::bump(&stats.units_failed);
                            warn!(
                                category = %unit.job.category,
                                page_no = unit.page_no,
                                error = %e,
                                "Crawl unit failed; skipping"
                            );
                        }
                    }
                })
                .await;
        }

        if let Some(e) = fatal.into_inner().unwrap_or_else(|p| p.into_inner()) {
            return Err(e);
        }

        let summary = stats.summary(self.ctx.cancel.is_cancelled());
        let elapsed = started.elapsed();
        info!(
            ?elapsed,
            units = summary.units,
            units_failed = summary.units_failed,
            units_skipped = summary.units_skipped,
            units_cancelled = summary.units_cancelled,
            links = summary.links,
            inserted = summary.inserted,
            updated = summary.updated,
            discarded = summary.discarded,
            navigation_failures = summary.navigation_failures,
            persistence_failures = summary.persistence_failures,
            cancelled = summary.cancelled,
            "Crawl finished"
        );
        Ok(summary)
    }

    async fn acquire_proxy(&self) -> Result<ProxyEndpoint> {
        for attempt in 1..=self.ctx.proxy_attempts {
            if let Some(proxy) = self.ctx.proxies.acquire().await {
                debug!(%proxy, attempt, "Leased proxy");
                return Ok(proxy);
            }
            debug!(attempt, max = self.ctx.proxy_attempts, "No proxy available");
        }
        Err(CrawlError::ProxyUnavailable(format!(
            "allocator returned nothing after {} attempt(s)",
            self.ctx.proxy_attempts
        )))
    }

    async fn open_session(&self, stats: &CrawlStats) -> Result<(SessionGuard, ProxyEndpoint)> {
        let proxy = self.acquire_proxy().await?;
        let session = SessionGuard::open(self.ctx.engine.as_ref(), &proxy).await?;
        CrawlStats::bump(&stats.sessions_opened);
        stats.launch_failures_in_a_row.store(0, Ordering::Relaxed);
        Ok((session, proxy))
    }

    /// `None` if the run is cancelled before `fut` finishes.
    async fn unless_cancelled<T>(&self, fut: impl Future<Output = T>) -> Option<T> {
        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    #[instrument(level = "info", skip_all, fields(category = %unit.job.category, page_no = unit.page_no))]
    async fn run_unit(&self, unit: &CrawlUnit, stats: &CrawlStats) -> Result<UnitEnd> {
        let (mut session, mut proxy) = self.open_session(stats).await?;
        let result = self.crawl_page(&mut session, &mut proxy, unit, stats).await;
        session.close().await;
        if matches!(result, Ok(UnitEnd::Cancelled)) {
            info!("Crawl cancelled; unit interrupted");
        }
        result
    }

    async fn crawl_page(
        &self,
        session: &mut SessionGuard,
        proxy: &mut ProxyEndpoint,
        unit: &CrawlUnit,
        stats: &CrawlStats,
    ) -> Result<UnitEnd> {
        let listed = self
            .unless_cancelled(self.ctx.listing.list_page(
                &mut **session,
                &unit.job.listing_template,
                unit.page_no,
            ))
            .await;
        let Some(urls) = listed else {
            return Ok(UnitEnd::Cancelled);
        };
        let urls = urls?;
        stats.links.fetch_add(urls.len(), Ordering::Relaxed);

        for url in urls {
            if self.ctx.cancel.is_cancelled() {
                return Ok(UnitEnd::Cancelled);
            }
            if proxy.is_expired() {
                self.rotate_session(session, proxy, stats).await?;
                CrawlStats::bump(&stats.sessions_rotated);
            }

            let extracted = self
                .unless_cancelled(self.ctx.extractor.extract(&mut **session, &url, &unit.job.category))
                .await;
            let raw = match extracted {
                None => return Ok(UnitEnd::Cancelled),
                Some(Ok(Some(raw))) => raw,
                Some(Ok(None)) => {
                    CrawlStats::bump(&stats.discarded);
                    continue;
                }
                Some(Err(e)) => {
                    CrawlStats::bump(&stats.navigation_failures);
                    warn!(%url, error = %e, "Article fetch failed; skipping");
                    continue;
                }
            };

            // Not raced against cancellation: the record must reach the store or the dead-letter file.
            match self.ctx.persister.save(raw).await {
                Ok(outcome) if outcome.inserted => CrawlStats::bump(&stats.inserted),
                Ok(_) => CrawlStats::bump(&stats.updated),
                Err(CrawlError::ExtractionEmpty { .. }) => CrawlStats::bump(&stats.discarded),
                Err(e) => {
                    CrawlStats::bump(&stats.persistence_failures);
                    warn!(%url, error = %e, "Article not persisted");
                }
            }
        }
        Ok(UnitEnd::Completed)
    }

    /// Swap in a session on a fresh proxy once the current lease has run out.
    async fn rotate_session(
        &self,
        session: &mut SessionGuard,
        proxy: &mut ProxyEndpoint,
        stats: &CrawlStats,
    ) -> Result<()> {
        info!(expired = %proxy, "Proxy lease expired; rotating session");
        let (fresh, fresh_proxy) = self.open_session(stats).await?;
        let stale = std::mem::replace(session, fresh);
        stale.close().await;
        *proxy = fresh_proxy;
        Ok(())
    }
}
