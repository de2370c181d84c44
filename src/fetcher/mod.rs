use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

pub mod browser;
pub mod http_client;
pub mod pool;
pub mod rate_limiter;
pub mod user_agent;

pub use browser::{NavigateOptions, RenderSession, RenderedPage, SessionLauncher};
pub use http_client::HttpClient;
pub use pool::{PoolStats, RenderPool};
pub use rate_limiter::RateLimiter;
pub use user_agent::UserAgentRotator;

use crate::config::{AppConfig, RenderConfig};
use crate::error::{CrawlError, CrawlResult};

/// How a page was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    Static,
    Dynamic,
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderMode::Static => write!(f, "static"),
            RenderMode::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// Raw page handed to the extraction engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub requested_url: String,
    /// URL after redirects; relative links resolve against this
    pub final_url: String,
    pub html: String,
    pub render_mode: RenderMode,
    pub duration_ms: u64,
    pub status: Option<u16>,
}

impl FetchResult {
    pub fn base_url(&self) -> CrawlResult<Url> {
        parse_http_url(&self.final_url)
    }
}

/// Parse and check an absolute http(s) URL
pub fn parse_http_url(raw: &str) -> CrawlResult<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| CrawlError::invalid_url(raw, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(CrawlError::invalid_url(raw, format!("unsupported scheme '{}'", other))),
    }
}

/// Retrieves HTML statically over HTTP or through the headless render pool
#[derive(Clone)]
pub struct Fetcher {
    http: HttpClient,
    pool: Option<Arc<RenderPool>>,
    render_config: RenderConfig,
}

impl Fetcher {
    /// Static-only fetcher; attach a pool with `with_render_pool`
    pub fn new(config: &AppConfig) -> CrawlResult<Self> {
        Ok(Self {
            http: HttpClient::new(&config.fetch)?,
            pool: None,
            render_config: config.render.clone(),
        })
    }

    /// Fetcher with the platform render backend when it is enabled and available
    pub async fn from_config(config: &AppConfig) -> CrawlResult<Self> {
        let fetcher = Self::new(config)?;
        if !config.render.enabled {
            info!("Dynamic rendering disabled by configuration");
            return Ok(fetcher);
        }

        match default_launcher(config, fetcher.http.user_agents().clone()).await {
            Ok(launcher) => {
                let pool = Arc::new(RenderPool::new(launcher, config.render.pool_size));
                Ok(fetcher.with_render_pool(pool))
            }
            Err(e) => {
                warn!("Dynamic rendering unavailable, continuing static-only: {}", e);
                Ok(fetcher)
            }
        }
    }

    pub fn with_render_pool(mut self, pool: Arc<RenderPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn render_pool(&self) -> Option<&Arc<RenderPool>> {
        self.pool.as_ref()
    }

    pub fn dynamic_available(&self) -> bool {
        self.pool.is_some()
    }

    /// Plain HTTP GET within `timeout`
    pub async fn fetch_static(&self, url: &Url, timeout: Duration) -> CrawlResult<FetchResult> {
        let start = Instant::now();
        let page = self.http.get_html(url, timeout).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!("Static fetch of {} took {}ms", url, duration_ms);

        Ok(FetchResult {
            requested_url: url.to_string(),
            final_url: page.final_url.to_string(),
            html: page.html,
            render_mode: RenderMode::Static,
            duration_ms,
            status: Some(page.status),
        })
    }

    /// Headless render through the session pool within `timeout`
    pub async fn fetch_dynamic(
        &self,
        url: &Url,
        wait_selector: Option<&str>,
        timeout: Duration,
    ) -> CrawlResult<FetchResult> {
        let pool = self.pool.as_ref().ok_or_else(|| CrawlError::RenderUnavailable {
            reason: "no headless render backend configured".to_string(),
        })?;

        let options = NavigateOptions {
            wait_selector: wait_selector.map(str::to_string),
            timeout,
            wait_selector_timeout: Duration::from_millis(self.render_config.wait_selector_timeout_ms).min(timeout),
            idle_wait: Duration::from_millis(self.render_config.idle_wait_ms),
        };

        let start = Instant::now();
        let page = pool.render(url, &options).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!("Dynamic fetch of {} took {}ms", url, duration_ms);

        Ok(FetchResult {
            requested_url: url.to_string(),
            final_url: page.final_url,
            html: page.html.trim().to_string(),
            render_mode: RenderMode::Dynamic,
            duration_ms,
            status: None,
        })
    }

    pub async fn fetch(
        &self,
        url: &Url,
        mode: RenderMode,
        wait_selector: Option<&str>,
        timeout: Duration,
    ) -> CrawlResult<FetchResult> {
        match mode {
            RenderMode::Static => self.fetch_static(url, timeout).await,
            RenderMode::Dynamic => self.fetch_dynamic(url, wait_selector, timeout).await,
        }
    }
}

#[cfg(feature = "browser")]
async fn default_launcher(config: &AppConfig, user_agents: UserAgentRotator) -> CrawlResult<Arc<dyn SessionLauncher>> {
    let launcher = browser::PlaywrightLauncher::new(&config.render, user_agents).await?;
    Ok(Arc::new(launcher))
}

#[cfg(not(feature = "browser"))]
async fn default_launcher(_config: &AppConfig, _user_agents: UserAgentRotator) -> CrawlResult<Arc<dyn SessionLauncher>> {
    Err(CrawlError::RenderUnavailable {
        reason: "built without the `browser` feature".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::browser::testing::FakeLauncher;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_static() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<ul><li>a</li></ul>"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&AppConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/list", server.uri())).unwrap();
        let result = fetcher.fetch_static(&url, Duration::from_secs(5)).await.unwrap();

        assert_eq!(result.render_mode, RenderMode::Static);
        assert_eq!(result.status, Some(200));
        assert!(result.html.contains("<li>a</li>"));
        assert_eq!(result.base_url().unwrap(), url);
    }

    #[tokio::test]
    async fn test_dynamic_without_backend_is_unavailable() {
        let fetcher = Fetcher::new(&AppConfig::default()).unwrap();
        let url = Url::parse("https://example.com").unwrap();
        let err = fetcher
            .fetch(&url, RenderMode::Dynamic, None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::RenderUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_fetch_dynamic_through_pool() {
        let url = Url::parse("https://example.com/app").unwrap();
        let launcher = FakeLauncher::new([(url.to_string(), "  <div id=\"app\"><p>rendered</p></div>  ".to_string())]);
        let pool = Arc::new(RenderPool::new(Arc::new(launcher), 1));
        let fetcher = Fetcher::new(&AppConfig::default()).unwrap().with_render_pool(pool);

        let result = fetcher
            .fetch_dynamic(&url, Some("#app p"), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(result.render_mode, RenderMode::Dynamic);
        assert!(result.html.starts_with("<div id=\"app\">"));
        assert_eq!(result.status, None);
    }

    #[test]
    fn test_parse_http_url() {
        assert!(parse_http_url("https://example.com/a").is_ok());
        assert_eq!(parse_http_url("javascript:alert(1)").unwrap_err().code(), "INVALID_URL");
        assert_eq!(parse_http_url("not a url").unwrap_err().code(), "INVALID_URL");
    }
}
