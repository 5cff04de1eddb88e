//! Static crawl configuration.
//!
//! Configuration is read from an optional YAML file. Every section has
//! defaults, so an empty file (or no file at all) crawls the built-in
//! leisu.com catalogs:
//!
//! ```yaml
//! workers: 4
//! jobs:
//!   - listing_template: "https://www.leisu.com/news/catalog-zuqiu/{page}"
//!     start_page: 1
//!     end_page: 20
//!     category: football
//! proxy:
//!   token: "..."
//!   lease_minutes: 5
//! render:
//!   navigation_timeout_secs: 30
//! ```

use crate::error::{CrawlError, Result};
use crate::models::CrawlJob;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

static PAGE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{page\}|%d").expect("placeholder pattern compiles"));

/// Top-level configuration for a crawl run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Listing catalogs to crawl, in order.
    pub jobs: Vec<CrawlJob>,
    /// Number of crawl units processed concurrently. `1` is fully sequential.
    pub workers: usize,
    pub proxy: ProxyConfig,
    pub render: RenderConfig,
    pub selectors: SiteSelectors,
    pub persistence: PersistenceConfig,
    /// Page listing every competition, used by the `competitions` command.
    pub competitions_url: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            workers: 1,
            proxy: ProxyConfig::default(),
            render: RenderConfig::default(),
            selectors: SiteSelectors::default(),
            persistence: PersistenceConfig::default(),
            competitions_url: "https://www.leisu.com/data/zuqiu/comp-120".to_string(),
        }
    }
}

/// The leisu.com news catalogs and the page ranges they had when last surveyed.
fn default_jobs() -> Vec<CrawlJob> {
    vec![
        CrawlJob::new("https://www.leisu.com/news/catalog-zuqiu/{page}", 1, 5462, "football"),
        CrawlJob::new("https://www.leisu.com/news/catalog-1/{page}", 1, 2173, "football"),
        CrawlJob::new("https://www.leisu.com/news/catalog-lanqiu/{page}", 1, 1860, "basketball"),
        CrawlJob::new("https://www.leisu.com/news/catalog-4/{page}", 1, 152, "basketball"),
    ]
}

/// Proxy allocator settings. Field names mirror the allocator's query parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub endpoint: String,
    pub token: String,
    pub address_type: String,
    pub quantity: u32,
    pub country: String,
    pub lease_minutes: u64,
    pub format: String,
    pub protocol: String,
    /// How many allocator calls a crawl unit makes before giving up.
    pub attempts_per_unit: u32,
    pub request_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://list.sky-ip.net/user_get_ip_list".to_string(),
            token: String::new(),
            address_type: "datacenter".to_string(),
            quantity: 1,
            country: String::new(),
            lease_minutes: 5,
            format: "json".to_string(),
            protocol: "http".to_string(),
            attempts_per_unit: 1,
            request_timeout_secs: 15,
        }
    }
}

impl ProxyConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_minutes * 60)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    pub navigation_timeout_secs: u64,
    /// Explicit Chromium binary; autodetected when unset.
    pub chrome_executable: Option<String>,
    pub headless: bool,
    pub no_sandbox: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_secs: 30,
            chrome_executable: None,
            headless: true,
            no_sandbox: false,
        }
    }
}

impl RenderConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }
}

/// CSS selectors describing the target site's DOM.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteSelectors {
    pub listing_item: String,
    pub listing_href_attr: String,
    pub competition_link: String,
    pub title: String,
    pub publish_time: String,
    pub content: String,
    pub image: String,
    pub image_src_attr: String,
}

impl Default for SiteSelectors {
    fn default() -> Self {
        Self {
            listing_item: ".new-item".to_string(),
            listing_href_attr: "href".to_string(),
            competition_link: ".competition-levels .competition a".to_string(),
            title: ".article-detail .title".to_string(),
            publish_time: ".article-detail .article-info .publish-time".to_string(),
            content: ".article-detail .article-content".to_string(),
            image: ".article-detail img".to_string(),
            image_src_attr: "src".to_string(),
        }
    }
}

impl SiteSelectors {
    fn all(&self) -> [(&'static str, &str); 6] {
        [
            ("listing_item", &self.listing_item),
            ("competition_link", &self.competition_link),
            ("title", &self.title),
            ("publish_time", &self.publish_time),
            ("content", &self.content),
            ("image", &self.image),
        ]
    }
}

/// Upsert retry and dead-letter settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub dead_letter_dir: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            dead_letter_dir: "./dead_letter".to_string(),
        }
    }
}

impl CrawlConfig {
    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(CrawlError::Config("workers must be at least 1".into()));
        }
        if self.proxy.attempts_per_unit == 0 {
            return Err(CrawlError::Config(
                "proxy.attempts_per_unit must be at least 1".into(),
            ));
        }
        for job in &self.jobs {
            validate_job(job)?;
        }
        for (name, selector) in self.selectors.all() {
            Selector::parse(selector).map_err(|e| {
                CrawlError::Config(format!("selector `{name}` ({selector}) is invalid: {e}"))
            })?;
        }
        Ok(())
    }
}

fn validate_job(job: &CrawlJob) -> Result<()> {
    let placeholders = PAGE_PLACEHOLDER.find_iter(&job.listing_template).count();
    if placeholders != 1 {
        return Err(CrawlError::Config(format!(
            "listing template {} must contain exactly one page placeholder, found {placeholders}",
            job.listing_template
        )));
    }
    if job.start_page == 0 || job.start_page > job.end_page {
        return Err(CrawlError::Config(format!(
            "job {} has invalid page range {}..={}",
            job.listing_template, job.start_page, job.end_page
        )));
    }
    if job.category.trim().is_empty() {
        return Err(CrawlError::Config(format!(
            "job {} has no category",
            job.listing_template
        )));
    }
    Ok(())
}

/// Substitute the page number into a listing template.
pub fn listing_url(template: &str, page_no: u32) -> String {
    PAGE_PLACEHOLDER
        .replace(template, page_no.to_string().as_str())
        .into_owned()
}

/// Load and validate configuration. `None` yields the built-in defaults.
#[instrument(level = "info")]
pub async fn load_config(path: Option<&Path>) -> Result<CrawlConfig> {
    let config = match path {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path).await?;
            let config: CrawlConfig = serde_yaml::from_str(&raw)?;
            info!(path = %path.display(), jobs = config.jobs.len(), "Loaded crawl configuration");
            config
        }
        None => {
            info!("No configuration file given; using built-in jobs");
            CrawlConfig::default()
        }
    };
    config.validate()?;
    Ok(config)
}
