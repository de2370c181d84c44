use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use crate::error::CrawlResult;

/// Options for a single headless navigation
#[derive(Debug, Clone)]
pub struct NavigateOptions {
    pub wait_selector: Option<String>,
    pub timeout: Duration,
    pub wait_selector_timeout: Duration,
    pub idle_wait: Duration,
}

/// Serialized DOM after rendering
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub html: String,
    pub final_url: String,
}

/// One live headless browser session
#[async_trait]
pub trait RenderSession: Send + Sync {
    /// Navigate, wait for content and serialize the DOM
    ///
    /// Any per-navigation state (browser context, tab) must be torn down
    /// before this returns, on success and on failure.
    async fn navigate(&self, url: &Url, options: &NavigateOptions) -> CrawlResult<RenderedPage>;

    /// False once the session crashed or was left in an unknown state
    fn is_healthy(&self) -> bool;

    async fn close(&self);
}

/// Starts new render sessions for the pool
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> CrawlResult<Box<dyn RenderSession>>;
}

#[cfg(feature = "browser")]
pub use playwright_backend::PlaywrightLauncher;

#[cfg(feature = "browser")]
mod playwright_backend {
    use async_trait::async_trait;
    use playwright::api::{Browser, DocumentLoadState, Viewport};
    use playwright::Playwright;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tracing::{debug, warn};
    use url::Url;

    use super::{NavigateOptions, RenderSession, RenderedPage, SessionLauncher};
    use crate::config::RenderConfig;
    use crate::error::{CrawlError, CrawlResult};
    use crate::fetcher::user_agent::UserAgentRotator;

    /// Launches headless Chromium sessions through Playwright
    pub struct PlaywrightLauncher {
        playwright: Playwright,
        config: RenderConfig,
        user_agents: UserAgentRotator,
    }

    // Playwright handles are driven through a channel to the driver process
    unsafe impl Send for PlaywrightLauncher {}
    unsafe impl Sync for PlaywrightLauncher {}

    impl PlaywrightLauncher {
        pub async fn new(config: &RenderConfig, user_agents: UserAgentRotator) -> CrawlResult<Self> {
            debug!("Initializing Playwright driver");
            let playwright = Playwright::initialize()
                .await
                .map_err(|e| CrawlError::RenderUnavailable { reason: e.to_string() })?;

            Ok(Self {
                playwright,
                config: config.clone(),
                user_agents,
            })
        }
    }

    #[async_trait]
    impl SessionLauncher for PlaywrightLauncher {
        async fn launch(&self) -> CrawlResult<Box<dyn RenderSession>> {
            let browser = self
                .playwright
                .chromium()
                .launcher()
                .headless(true)
                .launch()
                .await
                .map_err(|e| CrawlError::RenderUnavailable { reason: e.to_string() })?;

            debug!("Launched headless chromium session");

            Ok(Box::new(PlaywrightSession {
                browser,
                healthy: AtomicBool::new(true),
                user_agent: self.user_agents.random().to_string(),
                viewport: (self.config.viewport_width as i32, self.config.viewport_height as i32),
            }))
        }
    }

    struct PlaywrightSession {
        browser: Browser,
        healthy: AtomicBool,
        user_agent: String,
        viewport: (i32, i32),
    }

    unsafe impl Send for PlaywrightSession {}
    unsafe impl Sync for PlaywrightSession {}

    #[async_trait]
    impl RenderSession for PlaywrightSession {
        async fn navigate(&self, url: &Url, options: &NavigateOptions) -> CrawlResult<RenderedPage> {
            let timeout_ms = options.timeout.as_millis() as u64;
            let context = self
                .browser
                .context_builder()
                .user_agent(&self.user_agent)
                .viewport(Some(Viewport {
                    width: self.viewport.0,
                    height: self.viewport.1,
                }))
                .build()
                .await
                .map_err(|e| {
                    self.healthy.store(false, Ordering::SeqCst);
                    CrawlError::render(e.to_string())
                })?;

            let render = async {
                let page = context.new_page().await.map_err(|e| CrawlError::render(e.to_string()))?;

                page.goto_builder(url.as_str())
                    .wait_until(DocumentLoadState::NetworkIdle)
                    .timeout(timeout_ms as f64)
                    .goto()
                    .await
                    .map_err(|e| CrawlError::render(format!("navigation failed: {}", e)))?;

                match options.wait_selector.as_deref().filter(|s| !s.trim().is_empty()) {
                    Some(selector) => {
                        // A missing wait selector is not fatal; the page is still serialized
                        if let Err(e) = page
                            .wait_for_selector_builder(selector)
                            .timeout(options.wait_selector_timeout.as_millis() as f64)
                            .wait_for_selector()
                            .await
                        {
                            warn!("Wait selector '{}' did not appear on {}: {}", selector, url, e);
                        }
                    }
                    None => tokio::time::sleep(options.idle_wait).await,
                }

                let html = page.content().await.map_err(|e| CrawlError::render(e.to_string()))?;
                let final_url = page.url().unwrap_or_else(|_| url.to_string());

                Ok::<RenderedPage, CrawlError>(RenderedPage { html, final_url })
            };

            let result = match tokio::time::timeout(options.timeout, render).await {
                Ok(result) => result,
                Err(_) => Err(CrawlError::RenderTimeout {
                    url: url.to_string(),
                    timeout_ms,
                }),
            };

            if let Err(e) = context.close().await {
                warn!("Failed to close browser context: {}", e);
                self.healthy.store(false, Ordering::SeqCst);
            }
            if result.is_err() {
                self.healthy.store(false, Ordering::SeqCst);
            }

            result
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        async fn close(&self) {
            self.healthy.store(false, Ordering::SeqCst);
            if let Err(e) = self.browser.close().await {
                warn!("Failed to close browser: {}", e);
            }
        }
    }
}

/// Fake render backend used by tests across the crate
#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::error::CrawlError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    pub struct FakeCounters {
        pub launched: AtomicUsize,
        pub navigations: AtomicUsize,
        pub closed: AtomicUsize,
    }

    /// Serves canned HTML per URL, optionally slow or failing
    pub struct FakeLauncher {
        pub pages: HashMap<String, String>,
        pub delay: Duration,
        pub fail_navigation: bool,
        pub counters: Arc<FakeCounters>,
    }

    impl FakeLauncher {
        pub fn new(pages: impl IntoIterator<Item = (String, String)>) -> Self {
            Self {
                pages: pages.into_iter().collect(),
                delay: Duration::ZERO,
                fail_navigation: false,
                counters: Arc::new(FakeCounters::default()),
            }
        }

        pub fn empty() -> Self {
            Self::new(Vec::new())
        }
    }

    #[async_trait]
    impl SessionLauncher for FakeLauncher {
        async fn launch(&self) -> CrawlResult<Box<dyn RenderSession>> {
            self.counters.launched.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                pages: self.pages.clone(),
                delay: self.delay,
                fail_navigation: self.fail_navigation,
                healthy: AtomicBool::new(true),
                counters: self.counters.clone(),
            }))
        }
    }

    pub struct FakeSession {
        pages: HashMap<String, String>,
        delay: Duration,
        fail_navigation: bool,
        healthy: AtomicBool,
        counters: Arc<FakeCounters>,
    }

    #[async_trait]
    impl RenderSession for FakeSession {
        async fn navigate(&self, url: &Url, _options: &NavigateOptions) -> CrawlResult<RenderedPage> {
            self.counters.navigations.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail_navigation {
                self.healthy.store(false, Ordering::SeqCst);
                return Err(CrawlError::render("renderer crashed"));
            }
            let html = self
                .pages
                .get(url.as_str())
                .cloned()
                .unwrap_or_else(|| "<html><body></body></html>".to_string());
            Ok(RenderedPage {
                html,
                final_url: url.to_string(),
            })
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        async fn close(&self) {
            self.healthy.store(false, Ordering::SeqCst);
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
