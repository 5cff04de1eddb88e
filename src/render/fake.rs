//! Canned-HTML render engine for tests.

use super::{PageSnapshot, RenderEngine, RenderSession};
use crate::error::{CrawlError, Result};
use crate::models::ProxyEndpoint;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
enum FakePage {
    Html(String),
    Fail(String),
    Redirect(String),
}

#[derive(Debug, Default)]
struct Counters {
    open_attempts: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    navigations: Mutex<Vec<String>>,
    proxies: Mutex<Vec<String>>,
}

/// Serves fixed HTML per URL. Unknown URLs fail navigation.
#[derive(Debug, Clone, Default)]
pub struct FakeEngine {
    pages: Arc<HashMap<String, FakePage>>,
    counters: Arc<Counters>,
    open_error: Option<String>,
    failing_opens: Arc<HashSet<usize>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        Arc::make_mut(&mut self.pages).insert(url.to_string(), FakePage::Html(html.to_string()));
        self
    }

    pub fn with_failing_page(mut self, url: &str, reason: &str) -> Self {
        Arc::make_mut(&mut self.pages).insert(url.to_string(), FakePage::Fail(reason.to_string()));
        self
    }

    /// Loading `from` lands on the page registered at `to`.
    pub fn with_redirect(mut self, from: &str, to: &str) -> Self {
        Arc::make_mut(&mut self.pages).insert(from.to_string(), FakePage::Redirect(to.to_string()));
        self
    }

    /// Every `open` fails with a fatal engine error.
    pub fn broken(mut self, reason: &str) -> Self {
        self.open_error = Some(reason.to_string());
        self
    }

    /// The listed `open` attempts (1-based) fail with an engine error; the rest succeed.
    pub fn with_failing_opens(mut self, attempts: &[usize]) -> Self {
        Arc::make_mut(&mut self.failing_opens).extend(attempts.iter().copied());
        self
    }

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.counters.navigations.lock().unwrap().clone()
    }

    pub fn proxies(&self) -> Vec<String> {
        self.counters.proxies.lock().unwrap().clone()
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn open(&self, proxy: &ProxyEndpoint) -> Result<Box<dyn RenderSession>> {
        if let Some(reason) = &self.open_error {
            return Err(CrawlError::RenderEngine(reason.clone()));
        }
        let attempt = self.counters.open_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_opens.contains(&attempt) {
            return Err(CrawlError::RenderEngine(format!("launch {attempt} failed")));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        self.counters.proxies.lock().unwrap().push(proxy.address.clone());
        Ok(Box::new(FakeSession {
            pages: Arc::clone(&self.pages),
            counters: Arc::clone(&self.counters),
            snapshot: None,
        }))
    }
}

struct FakeSession {
    pages: Arc<HashMap<String, FakePage>>,
    counters: Arc<Counters>,
    snapshot: Option<PageSnapshot>,
}

#[async_trait]
impl RenderSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.counters.navigations.lock().unwrap().push(url.to_string());
        self.snapshot = None;
        let (landed, page) = match self.pages.get(url) {
            Some(FakePage::Redirect(to)) => (to.as_str(), self.pages.get(to)),
            page => (url, page),
        };
        match page {
            Some(FakePage::Html(html)) => {
                self.snapshot = Some(PageSnapshot::new(landed, html.clone()));
                Ok(())
            }
            Some(FakePage::Redirect(_)) => Err(CrawlError::navigation(url, "net::ERR_TOO_MANY_REDIRECTS")),
            Some(FakePage::Fail(reason)) => Err(CrawlError::navigation(url, reason)),
            None => Err(CrawlError::navigation(url, "net::ERR_NAME_NOT_RESOLVED")),
        }
    }

    fn snapshot(&self) -> Option<&PageSnapshot> {
        self.snapshot.as_ref()
    }

    async fn close(self: Box<Self>) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}
