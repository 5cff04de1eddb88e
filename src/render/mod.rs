//! Browser rendering behind a narrow capability interface.
//!
//! The rest of the pipeline only needs two things from a browser: load a URL,
//! then ask the loaded document for text or attributes by CSS selector. That
//! contract is [`RenderSession`]; [`RenderEngine`] opens sessions bound to a
//! proxy address.
//!
//! # Sessions
//!
//! A session owns one browser process and one page. It is opened per crawl
//! unit, used exclusively by that unit, and released when the unit ends.
//! [`SessionGuard`] makes the release unconditional: call
//! [`SessionGuard::close`] on the normal path, and the guard's `Drop` tears
//! the session down on any path that skipped it.
//!
//! # Queries
//!
//! After each successful navigation the session captures the rendered HTML
//! as a [`PageSnapshot`]. Queries run against that snapshot, so a selector
//! that matches nothing yields `None` instead of an error.

pub mod chromium;
#[cfg(test)]
pub mod fake;
pub mod snapshot;

pub use chromium::ChromiumEngine;
pub use snapshot::{PageSnapshot, Query};

use crate::error::Result;
use crate::models::ProxyEndpoint;
use async_trait::async_trait;
use std::ops::{Deref, DerefMut};
use tracing::{debug, warn};

/// Opens render sessions.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Launch a browser egressing through `proxy` and open one page.
    async fn open(&self, proxy: &ProxyEndpoint) -> Result<Box<dyn RenderSession>>;
}

/// One browser instance plus page context, bound to one proxy address.
#[async_trait]
pub trait RenderSession: Send {
    /// Load `url` and capture the resulting document.
    ///
    /// Network, proxy and timeout failures are returned as
    /// [`crate::error::CrawlError::Navigation`]; nothing is retried here.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Document captured by the last successful navigation.
    fn snapshot(&self) -> Option<&PageSnapshot>;

    /// Release the page and the browser process.
    async fn close(self: Box<Self>);

    /// First match of `query` in the current document.
    fn query(&self, query: &Query) -> Option<String> {
        self.snapshot().and_then(|doc| doc.query(query))
    }

    /// Every match of `query`, in document order.
    fn query_all(&self, query: &Query) -> Vec<Option<String>> {
        self.snapshot()
            .map(|doc| doc.query_all(query))
            .unwrap_or_default()
    }

    /// First match of each query, evaluated against a single parse.
    fn query_many(&self, queries: &[Query]) -> Vec<Option<String>> {
        match self.snapshot() {
            Some(doc) => doc.query_many(queries),
            None => vec![None; queries.len()],
        }
    }
}

/// Scoped ownership of a [`RenderSession`].
pub struct SessionGuard {
    session: Option<Box<dyn RenderSession>>,
    proxy: String,
}

impl SessionGuard {
    pub async fn open(engine: &dyn RenderEngine, proxy: &ProxyEndpoint) -> Result<Self> {
        let session = engine.open(proxy).await?;
        debug!(%proxy, "Render session opened");
        Ok(Self {
            session: Some(session),
            proxy: proxy.to_string(),
        })
    }

    /// Close the session, consuming the guard.
    pub async fn close(mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
            debug!(proxy = %self.proxy, "Render session closed");
        }
    }
}

impl Deref for SessionGuard {
    type Target = dyn RenderSession;

    fn deref(&self) -> &Self::Target {
        self.session
            .as_deref()
            .expect("SessionGuard: session already closed")
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
            .as_deref_mut()
            .expect("SessionGuard: session already closed")
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            warn!(proxy = %self.proxy, "Render session dropped without close; releasing in background");
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { session.close().await });
                }
                // No runtime left: the session's own Drop kills the process.
                Err(_) => drop(session),
            }
        }
    }
}
