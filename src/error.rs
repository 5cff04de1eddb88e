//! Error taxonomy for the crawl pipeline.
//!
//! Failures are classified by the granularity they affect:
//!
//! | Variant | Scope | Effect |
//! |---------|-------|--------|
//! | [`CrawlError::ProxyUnavailable`] | crawl unit | unit skipped |
//! | [`CrawlError::Navigation`] | page or article | URL skipped |
//! | [`CrawlError::ExtractionEmpty`] | article | record discarded |
//! | [`CrawlError::Persistence`] | article | retried, then dead-lettered |
//! | [`CrawlError::RenderEngine`] | process | run aborted |
//! | [`CrawlError::Config`] | process | run aborted |

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrawlError>;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("no proxy address available: {0}")]
    ProxyUnavailable(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("{url} has no article content")]
    ExtractionEmpty { url: String },

    #[error("persisting article {fingerprint} failed: {reason}")]
    Persistence { fingerprint: String, reason: String },

    #[error("render engine error: {0}")]
    RenderEngine(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CrawlError {
    /// Errors that leave the process unable to crawl anything at all.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CrawlError::RenderEngine(_) | CrawlError::Config(_))
    }

    pub fn navigation(url: &str, reason: impl ToString) -> Self {
        CrawlError::Navigation {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for CrawlError {
    fn from(err: serde_yaml::Error) -> Self {
        CrawlError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_setup_errors_are_fatal() {
        assert!(CrawlError::RenderEngine("no chrome".into()).is_fatal());
        assert!(CrawlError::Config("bad".into()).is_fatal());
        assert!(!CrawlError::ProxyUnavailable("empty".into()).is_fatal());
        assert!(!CrawlError::navigation("https://a", "timeout").is_fatal());
        assert!(
            !CrawlError::Persistence {
                fingerprint: "ab".into(),
                reason: "down".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_navigation_display() {
        let err = CrawlError::navigation("https://example.com/a", "timed out");
        assert_eq!(
            err.to_string(),
            "navigation to https://example.com/a failed: timed out"
        );
    }
}
