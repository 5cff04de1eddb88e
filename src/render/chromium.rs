//! Headless Chromium adapter built on `chromiumoxide`.
//!
//! Each session launches its own browser process with
//! `--proxy-server=<proxy>` so that every page load egresses through the
//! session's leased address. The CDP event handler runs on a spawned task for
//! the lifetime of the session.

use super::{PageSnapshot, RenderEngine, RenderSession};
use crate::config::RenderConfig;
use crate::error::{CrawlError, Result};
use crate::models::ProxyEndpoint;
use async_trait::async_trait;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct ChromiumEngine {
    config: RenderConfig,
}

impl ChromiumEngine {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    fn browser_config(&self, proxy: &ProxyEndpoint) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .arg(format!("--proxy-server={}", proxy.server_url()))
            .request_timeout(self.config.navigation_timeout());
        if !self.config.headless {
            builder = builder.with_head();
        }
        if self.config.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(exe) = &self.config.chrome_executable {
            builder = builder.chrome_executable(exe);
        }
        builder.build().map_err(CrawlError::RenderEngine)
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    #[instrument(level = "debug", skip_all, fields(%proxy))]
    async fn open(&self, proxy: &ProxyEndpoint) -> Result<Box<dyn RenderSession>> {
        let config = self.browser_config(proxy)?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| CrawlError::RenderEngine(format!("failed to launch Chromium: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler stopped");
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                shutdown(&mut browser).await;
                handler_task.abort();
                return Err(CrawlError::RenderEngine(format!("failed to open page: {e}")));
            }
        };

        Ok(Box::new(ChromiumSession {
            browser: Some(browser),
            page: Some(page),
            handler_task: Some(handler_task),
            snapshot: None,
            timeout: self.config.navigation_timeout(),
        }))
    }
}

/// How long a closed browser gets to exit before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(10);

/// The exit half of a browser process, split out so reaping can be bounded.
#[async_trait]
trait BrowserProcess: Send {
    async fn wait_exit(&mut self) -> std::io::Result<()>;
    async fn force_kill(&mut self);
}

#[async_trait]
impl BrowserProcess for Browser {
    async fn wait_exit(&mut self) -> std::io::Result<()> {
        self.wait().await.map(|_| ())
    }

    async fn force_kill(&mut self) {
        let _ = self.kill().await;
    }
}

/// Wait up to `grace` for the process to exit, killing it otherwise.
async fn reap<P: BrowserProcess + ?Sized>(process: &mut P, grace: Duration) {
    match tokio::time::timeout(grace, process.wait_exit()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Waiting for browser exit failed"),
        Err(_) => {
            warn!(?grace, "Browser did not exit after close; killing process");
            process.force_kill().await;
        }
    }
}

async fn shutdown(browser: &mut Browser) {
    if let Err(e) = browser.close().await {
        warn!(error = %e, "Browser close failed; killing process");
        browser.force_kill().await;
    }
    reap(browser, EXIT_GRACE).await;
}

struct ChromiumSession {
    browser: Option<Browser>,
    page: Option<Page>,
    handler_task: Option<JoinHandle<()>>,
    snapshot: Option<PageSnapshot>,
    timeout: Duration,
}

#[async_trait]
impl RenderSession for ChromiumSession {
    #[instrument(level = "debug", skip(self))]
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.snapshot = None;
        let Some(page) = self.page.as_ref() else {
            return Err(CrawlError::navigation(url, "session already closed"));
        };

        let load = async {
            page.goto(url).await?;
            let landed = page.url().await?.unwrap_or_else(|| url.to_string());
            let html = page.content().await?;
            Ok::<_, CdpError>((landed, html))
        };

        match tokio::time::timeout(self.timeout, load).await {
            Ok(Ok((landed, html))) => {
                if landed != url {
                    debug!(%landed, "Navigation redirected");
                }
                self.snapshot = Some(PageSnapshot::new(landed, html));
                Ok(())
            }
            Ok(Err(e)) => Err(CrawlError::navigation(url, e)),
            Err(_) => Err(CrawlError::navigation(
                url,
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }

    fn snapshot(&self) -> Option<&PageSnapshot> {
        self.snapshot.as_ref()
    }

    async fn close(mut self: Box<Self>) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!(error = %e, "Page close failed");
            }
        }
        if let Some(mut browser) = self.browser.take() {
            shutdown(&mut browser).await;
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        if let Some(mut browser) = self.browser.take() {
            warn!("Chromium session dropped while open; killing browser");
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = browser.kill().await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_config_builds_with_proxy() {
        let engine = ChromiumEngine::new(RenderConfig {
            chrome_executable: Some("/usr/bin/chromium".to_string()),
            no_sandbox: true,
            ..Default::default()
        });
        let proxy = ProxyEndpoint::new("203.0.113.7:8000", "http", Duration::from_secs(300));
        assert!(engine.browser_config(&proxy).is_ok());
    }

    #[derive(Default)]
    struct StuckProcess {
        exits: bool,
        killed: bool,
    }

    #[async_trait]
    impl BrowserProcess for StuckProcess {
        async fn wait_exit(&mut self) -> std::io::Result<()> {
            if !self.exits {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn force_kill(&mut self) {
            self.killed = true;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_kills_a_browser_that_never_exits() {
        let mut process = StuckProcess::default();
        reap(&mut process, EXIT_GRACE).await;
        assert!(process.killed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_leaves_an_exited_browser_alone() {
        let mut process = StuckProcess {
            exits: true,
            ..Default::default()
        };
        reap(&mut process, EXIT_GRACE).await;
        assert!(!process.killed);
    }
}
