use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

pub mod next_link;

pub use next_link::find_next_link;

use crate::config::PaginationConfig;
use crate::error::CrawlResult;
use crate::extract::{ExtractionEngine, ExtractionRun, RunWarning};
use crate::fetcher::{FetchResult, Fetcher, RateLimiter};
use crate::logging::LogContext;
use crate::template::ExtractionTemplate;

/// Per-call knobs on top of the template's pagination settings
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the template's page cap (still clamped to the hard cap)
    pub max_pages: Option<usize>,
    /// Stop as soon as this many rows exist
    pub row_target: Option<usize>,
    /// Overrides the template's `pagination.enabled`
    pub follow: Option<bool>,
}

/// Drives fetch + extraction across listing pages
///
/// Pages are visited strictly one after another with the render mode of
/// the first page.
#[derive(Clone)]
pub struct Paginator {
    fetcher: Fetcher,
    engine: ExtractionEngine,
    rate_limiter: RateLimiter,
    config: PaginationConfig,
}

impl Paginator {
    pub fn new(fetcher: Fetcher, engine: ExtractionEngine, config: PaginationConfig) -> Self {
        let rate_limiter = RateLimiter::new(Duration::from_millis(config.inter_page_delay_ms));
        Self {
            fetcher,
            engine,
            rate_limiter,
            config,
        }
    }

    /// Page cap for `template`: its own value or the default, within the hard cap
    pub fn effective_max_pages(&self, template: &ExtractionTemplate, options: &RunOptions) -> usize {
        options
            .max_pages
            .or(template.pagination.max_pages)
            .unwrap_or(self.config.default_max_pages)
            .clamp(1, self.config.hard_max_pages.max(1))
    }

    /// Extract `first_page` and follow next links from it
    ///
    /// A failure on the first page is returned as an error. Failures on later
    /// pages end the crawl but keep the rows gathered so far.
    pub async fn run(
        &self,
        template: &ExtractionTemplate,
        first_page: FetchResult,
        options: &RunOptions,
    ) -> CrawlResult<ExtractionRun> {
        let start = Instant::now();
        let max_pages = self.effective_max_pages(template, options);
        let per_page_timeout = self.config.per_page_timeout();
        let budget = per_page_timeout * max_pages as u32;
        let deadline = start + budget;
        let follow = options.follow.unwrap_or(template.pagination.enabled);
        let next_selector = template.pagination.next_selector.as_deref();
        let mode = first_page.render_mode;

        let mut run = ExtractionRun::new(mode);
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(visit_key(&first_page.requested_url));
        visited.insert(visit_key(&first_page.final_url));

        if let Ok(url) = first_page.base_url() {
            if let Some(host) = url.host_str() {
                // Start the politeness window at the first request
                self.rate_limiter.wait_for_domain(host).await;
            }
        }

        let mut current = first_page;
        let mut page_number = 1;

        loop {
            let extraction = match self
                .engine
                .extract_page(&current, template, page_number, run.next_row_index())
                .await
            {
                Ok(extraction) => extraction,
                Err(e) if page_number == 1 => return Err(e),
                Err(e) => {
                    record_failure(&mut run, page_number, &current.final_url, &e.to_string());
                    break;
                }
            };
            debug!(
                "Page {} of {} yielded {} row(s)",
                page_number,
                current.final_url,
                extraction.rows.len()
            );
            run.push_page(extraction);

            if !follow {
                break;
            }
            if options.row_target.map_or(false, |target| run.rows.len() >= target) {
                debug!("Row target reached after {} page(s)", page_number);
                break;
            }

            let base = match current.base_url() {
                Ok(base) => base,
                Err(_) => break,
            };
            let next = match find_next_link(&current.html, &base, next_selector) {
                Ok(Some(next)) => next,
                Ok(None) => {
                    debug!("No next link on page {}, pagination complete", page_number);
                    break;
                }
                Err(e) => {
                    run.errors.push(e.to_string());
                    break;
                }
            };

            if !visited.insert(visit_key(next.as_str())) {
                warn!("Pagination loop detected at {}", next);
                run.warnings.push(RunWarning::PaginationLoopDetected { url: next.to_string() });
                break;
            }

            if page_number >= max_pages {
                info!("Stopping at page cap of {}", max_pages);
                run.warnings.push(RunWarning::MaxPagesReached { max_pages });
                break;
            }

            let host = next.host_str().unwrap_or_default().to_string();
            if Instant::now() >= deadline || !self.rate_limiter.wait_until(&host, deadline).await {
                warn!("Crawl budget of {}ms exhausted", budget.as_millis());
                run.warnings.push(RunWarning::CrawlBudgetExhausted {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                });
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let timeout = per_page_timeout.min(remaining);
            current = match self
                .fetcher
                .fetch(&next, mode, template.wait_selector.as_deref(), timeout)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    record_failure(&mut run, page_number + 1, next.as_str(), &e.to_string());
                    break;
                }
            };
            // A fresh link can still redirect onto a page already extracted
            let landed = visit_key(&current.final_url);
            if landed != visit_key(next.as_str()) && !visited.insert(landed) {
                warn!("Pagination loop detected: {} redirected to {}", next, current.final_url);
                run.warnings.push(RunWarning::PaginationLoopDetected {
                    url: current.final_url.clone(),
                });
                break;
            }
            page_number += 1;
        }

        run.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Pagination finished: {} row(s) over {} page(s), {} warning(s)",
            run.total_count,
            run.pages_fetched,
            run.warnings.len()
        );
        Ok(run)
    }
}

fn record_failure(run: &mut ExtractionRun, page_number: usize, url: &str, message: &str) {
    let context = LogContext::new("paginator", "run")
        .with_url(url)
        .with_error_category("page_failed")
        .with_number_field("page_number", page_number as i64)
        .with_string_field("reason", message);
    crate::log_warn!(context, "Page failed, keeping rows gathered so far");
    run.warnings.push(RunWarning::PageFailed {
        page_number,
        url: url.to_string(),
        message: message.to_string(),
    });
    run.errors.push(message.to_string());
}

/// Visited-set key: the URL without its fragment
fn visit_key(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::fetcher::browser::testing::FakeLauncher;
    use crate::fetcher::{RenderMode, RenderPool};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn listing(page: usize, rows: usize, next: Option<&str>) -> String {
        let items: String = (0..rows)
            .map(|i| format!(r#"<li class="item"><a href="/doc/{page}-{i}">P{page} R{i}</a></li>"#))
            .collect();
        let next = next
            .map(|href| format!(r#"<a class="next" href="{}">Next</a>"#, href))
            .unwrap_or_default();
        format!(r#"<html><body><ul class="list">{}</ul>{}</body></html>"#, items, next)
    }

    async fn mount_page(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    fn paginator(config: PaginationConfig) -> Paginator {
        let mut app = AppConfig::default();
        app.fetch.max_retries = 0;
        Paginator::new(Fetcher::new(&app).unwrap(), ExtractionEngine::default(), config)
    }

    fn fast_config() -> PaginationConfig {
        PaginationConfig {
            inter_page_delay_ms: 0,
            per_page_timeout_ms: 2_000,
            ..PaginationConfig::default()
        }
    }

    fn template(server: &MockServer, max_pages: Option<usize>) -> ExtractionTemplate {
        ExtractionTemplate::ad_hoc(
            format!("{}/list/1", server.uri()),
            "ul.list > li.item",
            [("title", "a"), ("link", "a::attr(href)")],
        )
        .with_pagination(Some("a.next"), max_pages)
    }

    async fn first_page(paginator: &Paginator, template: &ExtractionTemplate) -> FetchResult {
        let url = Url::parse(&template.target_url).unwrap();
        paginator
            .fetcher
            .fetch(&url, RenderMode::Static, None, Duration::from_secs(2))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_max_pages_one_returns_first_page_only() {
        let server = MockServer::start().await;
        mount_page(&server, "/list/1", listing(1, 3, Some("/list/2"))).await;
        mount_page(&server, "/list/2", listing(2, 3, None)).await;

        let paginator = paginator(fast_config());
        let template = template(&server, Some(1));
        let first = first_page(&paginator, &template).await;
        let run = paginator.run(&template, first, &RunOptions::default()).await.unwrap();

        assert_eq!(run.pages_fetched, 1);
        assert_eq!(run.rows.len(), 3);
        assert!(run.rows.iter().all(|r| r.page_number == 1));
        assert!(run.has_warning(|w| matches!(w, RunWarning::MaxPagesReached { max_pages: 1 })));
    }

    #[tokio::test]
    async fn test_stops_when_pages_run_out() {
        let server = MockServer::start().await;
        mount_page(&server, "/list/1", listing(1, 2, Some("/list/2"))).await;
        mount_page(&server, "/list/2", listing(2, 3, None)).await;

        let paginator = paginator(fast_config());
        let template = template(&server, Some(3));
        let first = first_page(&paginator, &template).await;
        let run = paginator.run(&template, first, &RunOptions::default()).await.unwrap();

        assert_eq!(run.pages_fetched, 2);
        assert_eq!(run.rows.len(), 5);
        assert!(run.warnings.is_empty());
        assert!(run.errors.is_empty());

        // Page-major order with a global, monotonic index
        let indexes: Vec<_> = run.rows.iter().map(|r| r.row_index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
        assert_eq!(run.rows[2].values["title"], "P2 R0");
        assert_eq!(run.rows[2].values["link"], format!("{}/doc/2-0", server.uri()));
    }

    #[tokio::test]
    async fn test_loop_back_to_first_page_is_detected() {
        let server = MockServer::start().await;
        mount_page(&server, "/list/1", listing(1, 2, Some("/list/2"))).await;
        mount_page(&server, "/list/2", listing(2, 2, Some("/list/1#top"))).await;

        let paginator = paginator(fast_config());
        let template = template(&server, Some(10));
        let first = first_page(&paginator, &template).await;
        let run = paginator.run(&template, first, &RunOptions::default()).await.unwrap();

        assert_eq!(run.pages_fetched, 2);
        assert_eq!(run.rows.len(), 4);
        assert!(run.has_warning(|w| matches!(w, RunWarning::PaginationLoopDetected { .. })));
    }

    #[tokio::test]
    async fn test_redirect_back_to_visited_page_is_a_loop() {
        let server = MockServer::start().await;
        mount_page(&server, "/list/1", listing(1, 2, Some("/list/2"))).await;
        mount_page(&server, "/list/2", listing(2, 2, Some("/list/3"))).await;
        Mock::given(method("GET"))
            .and(path("/list/3"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/list/1"))
            .mount(&server)
            .await;

        let paginator = paginator(fast_config());
        let template = template(&server, Some(10));
        let first = first_page(&paginator, &template).await;
        let run = paginator.run(&template, first, &RunOptions::default()).await.unwrap();

        assert_eq!(run.pages_fetched, 2);
        let titles: Vec<_> = run.rows.iter().map(|r| r.values["title"].as_str()).collect();
        assert_eq!(titles, vec!["P1 R0", "P1 R1", "P2 R0", "P2 R1"]);
        let loop_url = format!("{}/list/1", server.uri());
        assert!(run.has_warning(|w| matches!(w, RunWarning::PaginationLoopDetected { url } if *url == loop_url)));
    }

    #[tokio::test]
    async fn test_dynamic_first_page_keeps_dynamic_mode() {
        let server = MockServer::start().await;
        // Any static GET would hit this and fail the expectation
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(9, 1, None)))
            .expect(0)
            .mount(&server)
            .await;

        let page1 = format!("{}/list/1", server.uri());
        let page2 = format!("{}/list/2", server.uri());
        let launcher = FakeLauncher::new([
            (page1.clone(), listing(1, 2, Some("/list/2"))),
            (page2, listing(2, 2, None)),
        ]);
        let counters = launcher.counters.clone();
        let pool = Arc::new(RenderPool::new(Arc::new(launcher), 1));

        let mut app = AppConfig::default();
        app.fetch.max_retries = 0;
        let fetcher = Fetcher::new(&app).unwrap().with_render_pool(pool);
        let paginator = Paginator::new(fetcher, ExtractionEngine::default(), fast_config());

        let template = template(&server, Some(5));
        let first = paginator
            .fetcher
            .fetch(&Url::parse(&page1).unwrap(), RenderMode::Dynamic, None, Duration::from_secs(2))
            .await
            .unwrap();
        let run = paginator.run(&template, first, &RunOptions::default()).await.unwrap();

        assert_eq!(run.render_mode, RenderMode::Dynamic);
        assert_eq!(run.pages_fetched, 2);
        assert_eq!(run.rows[3].values["title"], "P2 R1");
        assert!(run.errors.is_empty());
        assert_eq!(counters.navigations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pagination_disabled_reads_one_page() {
        let server = MockServer::start().await;
        mount_page(&server, "/list/1", listing(1, 2, Some("/list/2"))).await;

        let paginator = paginator(fast_config());
        let mut template = template(&server, None);
        template.pagination.enabled = false;
        let first = first_page(&paginator, &template).await;
        let run = paginator.run(&template, first, &RunOptions::default()).await.unwrap();

        assert_eq!(run.pages_fetched, 1);
        assert!(run.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_failed_later_page_keeps_rows() {
        let server = MockServer::start().await;
        mount_page(&server, "/list/1", listing(1, 2, Some("/list/2"))).await;
        Mock::given(method("GET"))
            .and(path("/list/2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let paginator = paginator(fast_config());
        let template = template(&server, Some(5));
        let first = first_page(&paginator, &template).await;
        let run = paginator.run(&template, first, &RunOptions::default()).await.unwrap();

        assert_eq!(run.rows.len(), 2);
        assert_eq!(run.pages_fetched, 1);
        assert!(run.has_warning(|w| matches!(w, RunWarning::PageFailed { page_number: 2, .. })));
        assert_eq!(run.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_row_target_stops_early() {
        let server = MockServer::start().await;
        mount_page(&server, "/list/1", listing(1, 3, Some("/list/2"))).await;
        mount_page(&server, "/list/2", listing(2, 3, Some("/list/3"))).await;
        mount_page(&server, "/list/3", listing(3, 3, None)).await;

        let paginator = paginator(fast_config());
        let template = template(&server, Some(10));
        let first = first_page(&paginator, &template).await;
        let options = RunOptions {
            row_target: Some(4),
            ..RunOptions::default()
        };
        let run = paginator.run(&template, first, &options).await.unwrap();

        assert_eq!(run.pages_fetched, 2);
        assert_eq!(run.rows.len(), 6);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_stops_crawl() {
        let server = MockServer::start().await;
        mount_page(&server, "/list/1", listing(1, 1, Some("/list/2"))).await;
        mount_page(&server, "/list/2", listing(2, 1, None)).await;

        // Politeness delay longer than the whole budget
        let config = PaginationConfig {
            inter_page_delay_ms: 60_000,
            per_page_timeout_ms: 100,
            ..PaginationConfig::default()
        };
        let paginator = paginator(config);
        let template = template(&server, Some(3));
        let first = first_page(&paginator, &template).await;

        let start = Instant::now();
        let run = paginator.run(&template, first, &RunOptions::default()).await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(run.pages_fetched, 1);
        assert!(run.has_warning(|w| matches!(w, RunWarning::CrawlBudgetExhausted { .. })));
    }

    #[test]
    fn test_effective_max_pages() {
        let paginator = paginator(PaginationConfig {
            default_max_pages: 50,
            hard_max_pages: 100,
            ..PaginationConfig::default()
        });
        let mut template = ExtractionTemplate::ad_hoc("https://example.com", "li", [("a", "a")]);
        let options = RunOptions::default();

        assert_eq!(paginator.effective_max_pages(&template, &options), 50);
        template.pagination.max_pages = Some(1000);
        assert_eq!(paginator.effective_max_pages(&template, &options), 100);
        let options = RunOptions {
            max_pages: Some(2),
            ..RunOptions::default()
        };
        assert_eq!(paginator.effective_max_pages(&template, &options), 2);
    }
}
