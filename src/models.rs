//! Data models shared across the crawl pipeline.
//!
//! - [`ProxyEndpoint`]: a leased egress address, consumed by one render session
//! - [`CrawlJob`] / [`CrawlUnit`]: static job configuration and the
//!   `(job, page)` work items derived from it
//! - [`RawArticle`]: fields extracted from an article page
//! - [`ArticleRecord`]: a fingerprinted article ready for upsert
//! - [`StoredArticle`]: a row as the persistence layer holds it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An egress address leased from the proxy allocator.
#[derive(Debug, Clone)]
pub struct ProxyEndpoint {
    /// `host:port` as returned by the allocator.
    pub address: String,
    /// Scheme the browser should use to talk to the proxy.
    pub protocol: String,
    pub leased_at: Instant,
    pub lease: Duration,
}

impl ProxyEndpoint {
    pub fn new(address: impl Into<String>, protocol: impl Into<String>, lease: Duration) -> Self {
        Self {
            address: address.into(),
            protocol: protocol.into(),
            leased_at: Instant::now(),
            lease,
        }
    }

    /// Value for Chromium's `--proxy-server` flag.
    pub fn server_url(&self) -> String {
        format!("{}://{}", self.protocol, self.address)
    }

    pub fn is_expired(&self) -> bool {
        self.leased_at.elapsed() >= self.lease
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// One listing catalog to crawl.
///
/// `listing_template` contains a single page placeholder (`{page}` or `%d`)
/// and pages `start_page..=end_page` are visited.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CrawlJob {
    pub listing_template: String,
    pub start_page: u32,
    pub end_page: u32,
    /// Category label stored on every article of this job (e.g. `football`).
    pub category: String,
}

impl CrawlJob {
    pub fn new(
        listing_template: impl Into<String>,
        start_page: u32,
        end_page: u32,
        category: impl Into<String>,
    ) -> Self {
        Self {
            listing_template: listing_template.into(),
            start_page,
            end_page,
            category: category.into(),
        }
    }

    pub fn pages(&self) -> std::ops::RangeInclusive<u32> {
        self.start_page..=self.end_page
    }

    pub fn page_count(&self) -> usize {
        self.pages().count()
    }
}

/// The smallest independently failable piece of listing work.
#[derive(Debug, Clone)]
pub struct CrawlUnit {
    pub job: Arc<CrawlJob>,
    pub page_no: u32,
}

/// Article fields as read off the page, before fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawArticle {
    pub url: String,
    pub title: String,
    pub publish_time: String,
    /// Trimmed plain-text body. Never empty once extraction accepted it.
    pub content: String,
    pub img: String,
    pub category: String,
}

/// Deduplication key: lowercase hex MD5 of the trimmed content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn of(content: &str) -> Self {
        Fingerprint(format!("{:x}", md5::compute(content.trim().as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Surrogate identity assigned by the store on first insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistedId(pub i64);

impl fmt::Display for PersistedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fingerprinted article, as handed to [`crate::store::ArticleStore::upsert`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub title: String,
    pub publish_time: String,
    pub content: String,
    pub img: String,
    pub category: String,
    pub fingerprint: Fingerprint,
}

impl ArticleRecord {
    pub fn from_raw(raw: RawArticle) -> Self {
        let content = raw.content.trim().to_string();
        let fingerprint = Fingerprint::of(&content);
        Self {
            title: raw.title,
            publish_time: raw.publish_time,
            content,
            img: raw.img,
            category: raw.category,
            fingerprint,
        }
    }
}

/// A persisted article row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArticle {
    pub id: PersistedId,
    #[serde(flatten)]
    pub record: ArticleRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Reserved for external housekeeping; this pipeline never sets it.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Result of an upsert keyed on the fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: PersistedId,
    /// `false` when an existing row with the same fingerprint was updated.
    pub inserted: bool,
}
