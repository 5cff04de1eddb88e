//! Proxy address acquisition.
//!
//! Every render session egresses through its own short-lived proxy address.
//! Addresses come from a third-party allocator that answers a single GET with
//! a JSON envelope:
//!
//! ```json
//! {"code": 0, "data": ["203.0.113.7:8000"], "msg": "success"}
//! ```
//!
//! [`ProxySource::acquire`] never retries and never caches: each call asks the
//! allocator again, and "nothing available" is reported as `None` so the
//! caller can decide whether to skip its unit or try again.

use crate::config::ProxyConfig;
use crate::error::{CrawlError, Result};
use crate::models::ProxyEndpoint;
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Source of single-use egress addresses.
#[async_trait]
pub trait ProxySource: Send + Sync {
    /// Lease one address, or `None` when the source has nothing to give.
    async fn acquire(&self) -> Option<ProxyEndpoint>;
}

/// Response envelope returned by the allocator.
#[derive(Debug, Deserialize)]
pub struct AllocatorEnvelope {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub data: Vec<String>,
    #[serde(default)]
    pub msg: String,
}

impl AllocatorEnvelope {
    /// First usable address in the envelope.
    pub fn first_address(&self) -> Option<&str> {
        self.data
            .iter()
            .map(|addr| addr.trim())
            .find(|addr| !addr.is_empty())
    }
}

/// Parse an allocator response body.
pub fn parse_envelope(body: &str) -> std::result::Result<AllocatorEnvelope, serde_json::Error> {
    serde_json::from_str(body)
}

/// [`ProxySource`] backed by the HTTP allocator service.
#[derive(Debug)]
pub struct AllocatorProxySource {
    client: reqwest::Client,
    config: ProxyConfig,
}

impl AllocatorProxySource {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CrawlError::Config(format!("cannot build allocator client: {e}")))?;
        Ok(Self { client, config })
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("token", self.config.token.clone()),
            ("type", self.config.address_type.clone()),
            ("qty", self.config.quantity.to_string()),
            ("country", self.config.country.clone()),
            ("time", self.config.lease_minutes.to_string()),
            ("format", self.config.format.clone()),
            ("protocol", self.config.protocol.clone()),
        ]
    }

    async fn fetch_body(&self) -> std::result::Result<String, reqwest::Error> {
        self.client
            .get(&self.config.endpoint)
            .query(&self.query())
            .send()
            .await?
            .text()
            .await
    }
}

#[async_trait]
impl ProxySource for AllocatorProxySource {
    #[instrument(level = "debug", skip_all, fields(endpoint = %self.config.endpoint))]
    async fn acquire(&self) -> Option<ProxyEndpoint> {
        let body = match self.fetch_body().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Proxy allocator request failed");
                return None;
            }
        };
        debug!(response = %truncate_for_log(&body, 300), "Proxy allocator response");

        let envelope = match parse_envelope(&body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, response = %truncate_for_log(&body, 300), "Unparsable allocator response");
                return None;
            }
        };

        match envelope.first_address() {
            Some(address) => Some(ProxyEndpoint::new(
                address,
                self.config.protocol.clone(),
                self.config.lease(),
            )),
            None => {
                warn!(code = envelope.code, msg = %envelope.msg, "Allocator returned no addresses");
                None
            }
        }
    }
}
