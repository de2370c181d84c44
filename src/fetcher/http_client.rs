use encoding_rs::{Encoding, UTF_8};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use super::user_agent::UserAgentRotator;
use crate::config::FetchConfig;
use crate::error::{CrawlError, CrawlResult};

/// Static page as returned by the HTTP layer
#[derive(Debug, Clone)]
pub struct HttpPage {
    pub final_url: Url,
    pub status: u16,
    pub html: String,
}

/// HTTP client wrapper with retry logic bounded by a per-call deadline
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    config: FetchConfig,
    user_agents: UserAgentRotator,
}

impl HttpClient {
    pub fn new(config: &FetchConfig) -> CrawlResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Accept",
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        if let Ok(language) = HeaderValue::from_str(&config.accept_language) {
            headers.insert("Accept-Language", language);
        }
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| CrawlError::config(format!("Failed to build HTTP client: {}", e)))?;

        info!("HTTP client initialized (max redirects: {})", config.max_redirects);

        Ok(Self {
            client,
            config: config.clone(),
            user_agents: UserAgentRotator::new(&config.user_agents),
        })
    }

    pub fn user_agents(&self) -> &UserAgentRotator {
        &self.user_agents
    }

    /// GET `url` and return its decoded body, retrying transient failures
    ///
    /// Retries never extend past `timeout`; once the deadline passes the call
    /// fails with `FetchTimeout`.
    pub async fn get_html(&self, url: &Url, timeout: Duration) -> CrawlResult<HttpPage> {
        let deadline = Instant::now() + timeout;
        let timeout_ms = timeout.as_millis() as u64;
        let max_attempts = self.config.max_retries + 1;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CrawlError::FetchTimeout { url: url.to_string(), timeout_ms });
            }

            debug!("HTTP GET attempt {} for: {}", attempt, url);

            let error = match tokio::time::timeout(remaining, self.make_request(url, remaining)).await {
                Err(_) => CrawlError::FetchTimeout { url: url.to_string(), timeout_ms },
                Ok(Ok(page)) if StatusCode::from_u16(page.status).map_or(false, |s| s.is_success()) => {
                    debug!("HTTP GET successful for: {} ({} bytes)", page.final_url, page.html.len());
                    return Ok(page);
                }
                Ok(Ok(page)) => CrawlError::HttpStatus { url: page.final_url.to_string(), status: page.status },
                Ok(Err(e)) if e.is_timeout() => CrawlError::FetchTimeout { url: url.to_string(), timeout_ms },
                Ok(Err(e)) => e,
            };

            // A timeout means the deadline is already spent
            if error.is_timeout() || !error.is_recoverable() || attempt >= max_attempts {
                return Err(error);
            }

            let delay = Duration::from_millis(self.config.retry_delay_ms * attempt as u64);
            if Instant::now() + delay >= deadline {
                return Err(error);
            }
            warn!("HTTP request failed for {} (attempt {}): {}, retrying", url, attempt, error);
            tokio::time::sleep(delay).await;
        }
    }

    /// Make single HTTP request
    async fn make_request(&self, url: &Url, timeout: Duration) -> CrawlResult<HttpPage> {
        let response = self
            .client
            .get(url.as_str())
            .header("User-Agent", self.user_agents.random())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, timeout, e))?;

        let final_url = response.url().clone();
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(url, timeout, e))?;
        let html = decode_html(&body, content_type.as_deref());

        Ok(HttpPage { final_url, status, html })
    }
}

/// Decode an HTML body
///
/// The charset comes from the Content-Type header, else from the document's
/// own `<meta charset>` or `http-equiv` declaration, else UTF-8. A BOM wins
/// over both.
pub fn decode_html(body: &[u8], content_type: Option<&str>) -> String {
    let label = content_type.and_then(header_charset).or_else(|| meta_charset(body));
    let encoding = label
        .as_deref()
        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(UTF_8);

    let (text, used, had_errors) = encoding.decode(body);
    if had_errors {
        debug!("Body had invalid {} sequences, replaced", used.name());
    }
    text.into_owned()
}

fn header_charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(|c: char| c == '"' || c == '\'').to_string())
    })
}

fn meta_charset(body: &[u8]) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)<meta[^>]*?charset\s*=\s*["']?\s*([-a-z0-9_.:]+)"#).expect("static meta charset pattern")
    });

    // Declarations must appear early in the document
    let head = String::from_utf8_lossy(&body[..body.len().min(4096)]);
    pattern.captures(&head).map(|caps| caps[1].to_string())
}

fn map_reqwest_error(url: &Url, timeout: Duration, error: reqwest::Error) -> CrawlError {
    if error.is_timeout() {
        CrawlError::FetchTimeout {
            url: url.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if error.is_redirect() {
        CrawlError::network(url.as_str(), format!("too many redirects: {}", error))
    } else {
        CrawlError::network(url.as_str(), error.to_string())
    }
}
