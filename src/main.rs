//! # Sports News Crawler
//!
//! Crawls paginated sports news catalogs through short-lived proxy addresses,
//! renders each page in a headless Chromium session, extracts the article
//! fields, and upserts them into Postgres keyed by the MD5 of their content.
//!
//! ## Usage
//!
//! ```sh
//! DATABASE_URL=postgres://localhost/news PROXY_TOKEN=... sports_news_crawler crawl -w 4
//! sports_news_crawler competitions -o competitions.json
//! ```
//!
//! ## Architecture
//!
//! 1. **Units**: every `(job, page)` pair becomes one crawl unit
//! 2. **Sessions**: each unit leases a proxy and opens its own browser session
//! 3. **Extraction**: the listing page yields article links, each loaded in
//!    the same session and read by CSS selector
//! 4. **Persistence**: articles are fingerprinted and upserted; records the
//!    database still rejects after retries go to a dead-letter file

use clap::Parser;
use itertools::Itertools;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod cli;
mod competitions;
mod config;
mod error;
mod extractor;
mod listing;
mod models;
mod orchestrator;
mod outputs;
mod proxy;
mod render;
mod store;
mod utils;

use cli::{Cli, Command, CrawlArgs, SessionArgs};
use competitions::CompetitionIndexer;
use config::{load_config, CrawlConfig};
use error::CrawlError;
use extractor::ArticleExtractor;
use listing::ListingTraversal;
use orchestrator::{CrawlContext, CrawlOrchestrator};
use outputs::{competitions::write_competitions, dead_letter::DeadLetterSink};
use proxy::{AllocatorProxySource, ProxySource};
use render::{ChromiumEngine, RenderEngine, SessionGuard};
use store::{ArticleStore, MemoryArticleStore, Persister, PgArticleStore, RetryStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("sports_news_crawler starting up");

    let args = Cli::parse();
    debug!(config = ?args.config, command = ?args.command, "Parsed CLI arguments");

    let mut config = load_config(args.config.as_deref()).await?;
    apply_session_args(&mut config, &args.session);

    let outcome = match args.command {
        Command::Crawl(crawl) => run_crawl(config, crawl).await,
        Command::Competitions { output } => run_competitions(config, output).await,
    };
    if let Err(e) = &outcome {
        error!(error = %e, "Run failed");
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    outcome
}

fn apply_session_args(config: &mut CrawlConfig, session: &SessionArgs) {
    if let Some(token) = &session.proxy_token {
        config.proxy.token = token.clone();
    }
    if let Some(exe) = &session.chrome_executable {
        config.render.chrome_executable = Some(exe.clone());
    }
    if session.headful {
        config.render.headless = false;
    }
}

#[instrument(level = "info", skip_all, fields(dry_run = args.dry_run))]
async fn run_crawl(mut config: CrawlConfig, args: CrawlArgs) -> Result<(), Box<dyn Error>> {
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(dir) = &args.dead_letter_dir {
        config.persistence.dead_letter_dir = dir.display().to_string();
    }
    config.validate()?;

    if config.proxy.token.is_empty() {
        warn!("No proxy token configured; the allocator will likely refuse every lease");
    }

    // --- Storage ---
    let mut memory = None;
    let persister = if args.dry_run {
        let store = Arc::new(MemoryArticleStore::new());
        memory = Some(Arc::clone(&store));
        info!("Dry run: articles are kept in memory only");
        Persister::new(store)
    } else {
        let database_url = args.database_url.as_deref().ok_or_else(|| {
            CrawlError::Config("DATABASE_URL is required unless --dry-run is given".into())
        })?;
        let pg = PgArticleStore::connect(database_url, args.max_connections).await?;
        pg.ensure_schema().await?;
        let store = RetryStore::from_config(pg, &config.persistence);
        debug!(?store, "Store configured");

        let sink = DeadLetterSink::new(&config.persistence.dead_letter_dir).await?;
        Persister::new(Arc::new(store)).with_dead_letter(sink)
    };

    // --- Cancellation ---
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; no new units will start");
                cancel.cancel();
            }
        });
    }

    let ctx = CrawlContext {
        proxies: Arc::new(AllocatorProxySource::new(config.proxy.clone())?),
        engine: Arc::new(ChromiumEngine::new(config.render.clone())),
        persister: Arc::new(persister),
        listing: ListingTraversal::new(&config.selectors),
        extractor: ArticleExtractor::new(&config.selectors),
        proxy_attempts: config.proxy.attempts_per_unit,
        cancel,
    };

    let categories = config.jobs.iter().map(|job| job.category.as_str()).unique().join(",");
    let pages: usize = config.jobs.iter().map(|job| job.page_count()).sum();
    info!(jobs = config.jobs.len(), pages, %categories, workers = config.workers, "Crawl plan ready");

    let summary = CrawlOrchestrator::new(ctx, config.workers)
        .run(&config.jobs)
        .await?;

    if let Some(memory) = memory {
        for row in memory.all() {
            debug!(id = %row.id, fingerprint = %row.record.fingerprint, title = %row.record.title, "Stored article");
        }
        info!(articles = memory.count().await?, "Dry run finished");
    }
    info!(
        saved = summary.saved(),
        units_failed = summary.units_failed,
        units_cancelled = summary.units_cancelled,
        cancelled = summary.cancelled,
        "Crawl complete"
    );
    Ok(())
}

#[instrument(level = "info", skip_all)]
async fn run_competitions(config: CrawlConfig, output: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let proxies = AllocatorProxySource::new(config.proxy.clone())?;
    let mut proxy = None;
    for attempt in 1..=config.proxy.attempts_per_unit {
        proxy = proxies.acquire().await;
        if proxy.is_some() {
            break;
        }
        debug!(attempt, "No proxy available");
    }
    let proxy = proxy.ok_or_else(|| {
        CrawlError::ProxyUnavailable("allocator returned nothing for the competitions page".into())
    })?;

    let engine = ChromiumEngine::new(config.render.clone());
    let mut session = SessionGuard::open(&engine as &dyn RenderEngine, &proxy).await?;
    let indexed = CompetitionIndexer::new(&config.selectors)
        .index(&mut *session, &config.competitions_url)
        .await;
    session.close().await;
    let index = indexed?;

    match output {
        Some(path) => write_competitions(&index, &path).await?,
        None => println!("{}", serde_json::to_string_pretty(&index)?),
    }
    Ok(())
}
