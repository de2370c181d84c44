use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

pub mod stores;

pub use stores::{InMemoryResultsStore, InMemoryTemplateStore, ResultsStore, StoredRun, TemplateStore};

use crate::classifier::{HeuristicClassifier, RenderDecision, RenderModeClassifier};
use crate::config::AppConfig;
use crate::contextual_error;
use crate::diagnostics::{DiagnosisReport, Diagnostician, PreviewResult, PreviewWindow, RunOutcome};
use crate::error::{CrawlError, CrawlResult};
use crate::extract::{probe_selector, ExtractionEngine, ExtractionRun, RunWarning};
use crate::fetcher::{parse_http_url, FetchResult, Fetcher, RenderMode};
use crate::logging::{LogContext, PerformanceLogger, RequestIdGenerator};
use crate::paginator::{Paginator, RunOptions};
use crate::template::{compile_css, ExtractionTemplate, FieldSelector, RenderModeOverride, TemplateValidator};

/// Outcome of probing one selector against a live page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorValidation {
    /// True when the selector parses and matches at least one element
    pub valid: bool,
    pub match_count: usize,
    pub samples: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_mode: Option<RenderMode>,
}

/// Result of a first-page trial run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub success: bool,
    pub count: usize,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_mode: Option<RenderMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<DiagnosisReport>,
}

/// What a full execution produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub run_id: String,
    pub template_id: String,
    pub total_count: usize,
    pub pages_fetched: usize,
    pub render_mode: RenderMode,
    pub empty_result: bool,
    pub warnings: Vec<RunWarning>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Error escaping an operation, with the diagnosis built for it
#[derive(Debug)]
pub struct DiagnosedError {
    pub error: CrawlError,
    pub diagnosis: DiagnosisReport,
}

/// First page of a run after render-mode resolution
pub struct FirstPage {
    pub page: FetchResult,
    /// Static HTML, kept for diagnosis when the page was re-rendered
    pub static_html: Option<String>,
    pub decision: Option<RenderDecision>,
    /// Why a wanted dynamic render did not happen
    pub fallback_error: Option<String>,
}

/// Entry point for every inbound crawler operation
pub struct CrawlerService {
    config: AppConfig,
    fetcher: Fetcher,
    engine: ExtractionEngine,
    classifier: Arc<dyn RenderModeClassifier>,
    paginator: Paginator,
    diagnostician: Diagnostician,
    validator: TemplateValidator,
    templates: Arc<dyn TemplateStore>,
    results: Arc<dyn ResultsStore>,
}

impl CrawlerService {
    /// Build the service and its subsystems from configuration
    pub async fn from_config(
        config: AppConfig,
        templates: Arc<dyn TemplateStore>,
        results: Arc<dyn ResultsStore>,
    ) -> CrawlResult<Self> {
        info!("Initializing crawler service");

        let fetcher = Fetcher::from_config(&config).await?;
        info!(
            "Fetcher initialized (dynamic rendering {})",
            if fetcher.dynamic_available() { "available" } else { "unavailable" }
        );

        let engine = ExtractionEngine::from_config(&config.parser)?;
        info!("Extraction engine initialized with parser '{}'", engine.parser_name());

        Ok(Self::new(config, fetcher, engine, templates, results))
    }

    /// Assemble from prepared parts with the heuristic classifier
    pub fn new(
        config: AppConfig,
        fetcher: Fetcher,
        engine: ExtractionEngine,
        templates: Arc<dyn TemplateStore>,
        results: Arc<dyn ResultsStore>,
    ) -> Self {
        let classifier: Arc<dyn RenderModeClassifier> = Arc::new(HeuristicClassifier::new(config.classifier.clone()));
        let paginator = Paginator::new(fetcher.clone(), engine.clone(), config.pagination.clone());

        Self {
            diagnostician: Diagnostician::new(classifier.clone()),
            classifier,
            paginator,
            fetcher,
            engine,
            validator: TemplateValidator::new(),
            templates,
            results,
            config,
        }
    }

    /// Swap the render-mode heuristic
    pub fn with_classifier(mut self, classifier: Arc<dyn RenderModeClassifier>) -> Self {
        self.diagnostician = Diagnostician::new(classifier.clone());
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Fetch the template's first page in the render mode it needs
    ///
    /// In auto mode the static HTML is classified and re-rendered when it
    /// looks script-driven. A failed re-render falls back to the static page.
    pub async fn fetch_first_page(&self, template: &ExtractionTemplate) -> CrawlResult<FirstPage> {
        let url = self.validator.validate_target_url(&template.target_url)?;
        let wait_selector = template.wait_selector.as_deref();

        if template.render_mode == RenderModeOverride::Dynamic {
            let page = self
                .fetcher
                .fetch_dynamic(&url, wait_selector, self.config.render.timeout())
                .await?;
            return Ok(FirstPage {
                page,
                static_html: None,
                decision: None,
                fallback_error: None,
            });
        }

        let page = self.fetcher.fetch_static(&url, self.config.fetch.request_timeout()).await?;
        let decision = self.classifier.decide(&page.html, &template.container_selector);

        let wants_dynamic = template.render_mode == RenderModeOverride::Auto && decision.needs_dynamic;
        if !wants_dynamic {
            return Ok(FirstPage {
                page,
                static_html: None,
                decision: Some(decision),
                fallback_error: None,
            });
        }

        if !self.fetcher.dynamic_available() {
            debug!("{} looks dynamic but no render backend is available", url);
            return Ok(FirstPage {
                page,
                static_html: None,
                decision: Some(decision),
                fallback_error: Some("dynamic rendering unavailable".to_string()),
            });
        }

        info!(
            "Static HTML of {} looks script-rendered (confidence {:.2}), rendering headless",
            url, decision.confidence
        );
        match self
            .fetcher
            .fetch_dynamic(&url, wait_selector, self.config.render.timeout())
            .await
        {
            Ok(rendered) => Ok(FirstPage {
                page: rendered,
                static_html: Some(page.html),
                decision: Some(decision),
                fallback_error: None,
            }),
            Err(e) => {
                warn!("Headless render of {} failed, keeping static HTML: {}", url, e);
                Ok(FirstPage {
                    page,
                    static_html: None,
                    decision: Some(decision),
                    fallback_error: Some(e.to_string()),
                })
            }
        }
    }

    /// Count matches of `selector` on `url` and sample their values
    pub async fn validate_selector(&self, url: &str, selector: &str) -> CrawlResult<SelectorValidation> {
        let selector = selector.trim();
        if selector.is_empty() {
            return Err(CrawlError::invalid_selector(selector, "selector must not be empty"));
        }

        let parsed = FieldSelector::parse(selector);
        if !parsed.css.is_empty() {
            if let Err(e) = compile_css(&parsed.css) {
                return Ok(SelectorValidation {
                    valid: false,
                    match_count: 0,
                    samples: Vec::new(),
                    error: Some(e.to_string()),
                    message: "Selector syntax error".to_string(),
                    render_mode: None,
                });
            }
        }

        let url = parse_http_url(url)?;
        let preview = &self.config.preview;
        let page = self.fetcher.fetch_static(&url, self.config.fetch.request_timeout()).await?;
        let mut probe = probe_selector(&page.html, selector, preview.sample_count, preview.sample_max_chars)?;
        let mut mode = RenderMode::Static;

        if probe.match_count == 0 && self.fetcher.dynamic_available() {
            let decision = self.classifier.decide(&page.html, &parsed.css);
            if decision.needs_dynamic {
                debug!("No static matches for '{}', retrying with headless render", selector);
                match self.fetcher.fetch_dynamic(&url, None, self.config.render.timeout()).await {
                    Ok(rendered) => {
                        probe = probe_selector(&rendered.html, selector, preview.sample_count, preview.sample_max_chars)?;
                        mode = RenderMode::Dynamic;
                    }
                    Err(e) => warn!("Headless retry for selector validation failed: {}", e),
                }
            }
        }

        let message = if probe.match_count > 0 {
            format!("Found {} matching element(s)", probe.match_count)
        } else {
            CrawlError::SelectorMismatch {
                selector: selector.to_string(),
                url: page.final_url.clone(),
            }
            .to_string()
        };

        Ok(SelectorValidation {
            valid: probe.match_count > 0,
            match_count: probe.match_count,
            samples: probe.samples,
            error: None,
            message,
            render_mode: Some(mode),
        })
    }

    /// Run `template` and return a window of its rows
    pub async fn preview(&self, template: &ExtractionTemplate, window: PreviewWindow) -> CrawlResult<PreviewResult> {
        self.validator.validate(template)?;
        let window = window.clamped(self.config.preview.max_limit);

        let first = self.fetch_first_page(template).await?;
        let options = if window.needs_pagination() {
            RunOptions {
                row_target: Some(window.row_target()),
                follow: Some(true),
                ..RunOptions::default()
            }
        } else {
            RunOptions {
                follow: Some(false),
                ..RunOptions::default()
            }
        };

        let run = self.run_from(template, first, &options).await?;
        debug!(
            "Preview of {} produced {} row(s) over {} page(s)",
            template.display_name(),
            run.rows.len(),
            run.pages_fetched
        );
        Ok(PreviewResult::from_run(run, window))
    }

    /// `preview`, with a diagnosis of the failure attached when it fails
    pub async fn preview_or_diagnose(
        &self,
        template: &ExtractionTemplate,
        window: PreviewWindow,
    ) -> Result<PreviewResult, DiagnosedError> {
        self.preview(template, window).await.map_err(|error| {
            let diagnosis =
                self.diagnostician
                    .diagnose(&template.target_url, template, RunOutcome::Failed(&error), None);
            DiagnosedError { error, diagnosis }
        })
    }

    /// Explain why `template` yields what it yields on `url`; never fails
    pub async fn diagnose(
        &self,
        url: &str,
        template: &ExtractionTemplate,
        error_context: Option<&str>,
    ) -> DiagnosisReport {
        let template = retarget(template, url);

        if let Err(e) = self.validator.validate(&template) {
            return self
                .diagnostician
                .diagnose(url, &template, RunOutcome::Failed(&e), error_context);
        }

        match self.first_page_run(&template).await {
            Ok((run, static_html)) => self.diagnostician.diagnose(
                url,
                &template,
                RunOutcome::Completed {
                    run: &run,
                    static_html: static_html.as_deref(),
                },
                error_context,
            ),
            Err(e) => self
                .diagnostician
                .diagnose(url, &template, RunOutcome::Failed(&e), error_context),
        }
    }

    /// Trial run on the first page only
    pub async fn test(&self, url: &str, template: &ExtractionTemplate) -> TestOutcome {
        let template = retarget(template, url);

        let outcome = match self.validator.validate(&template) {
            Ok(()) => self.first_page_run(&template).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok((run, _)) if !run.rows.is_empty() => TestOutcome {
                success: true,
                count: run.rows.len(),
                message: format!("Extracted {} row(s) from the first page", run.rows.len()),
                render_mode: Some(run.render_mode),
                diagnosis: None,
            },
            Ok((run, static_html)) => {
                let diagnosis = self.diagnostician.diagnose(
                    url,
                    &template,
                    RunOutcome::Completed {
                        run: &run,
                        static_html: static_html.as_deref(),
                    },
                    None,
                );
                TestOutcome {
                    success: false,
                    count: 0,
                    message: diagnosis
                        .issues
                        .first()
                        .map(|issue| issue.message.clone())
                        .unwrap_or_else(|| "No rows extracted".to_string()),
                    render_mode: Some(run.render_mode),
                    diagnosis: Some(diagnosis),
                }
            }
            Err(e) => TestOutcome {
                success: false,
                count: 0,
                message: e.to_string(),
                render_mode: None,
                diagnosis: Some(self.diagnostician.diagnose(url, &template, RunOutcome::Failed(&e), None)),
            },
        }
    }

    /// Full crawl of a stored template, persisted through the results store
    pub async fn execute(&self, template_id: &str) -> CrawlResult<ExecutionSummary> {
        let request_id = RequestIdGenerator::generate();
        let perf = PerformanceLogger::new(
            LogContext::new("crawler_service", "execute")
                .with_request_id(request_id.clone())
                .with_template_id(template_id),
        );

        match self.execute_inner(template_id).await {
            Ok(summary) => {
                perf.finish_with_status(
                    &format!("Template {} produced {} row(s)", template_id, summary.total_count),
                    if summary.errors.is_empty() { "completed" } else { "partial" },
                );
                Ok(summary)
            }
            Err(e) => {
                perf.finish_with_error("Template execution failed", &e);
                let mut contextual = contextual_error!(e, "execute", "crawler_service");
                contextual.context.request_id = Some(request_id);
                warn!("{}", contextual);
                Err(contextual.error)
            }
        }
    }

    async fn execute_inner(&self, template_id: &str) -> CrawlResult<ExecutionSummary> {
        let template = self.templates.get_template(template_id).await?;
        self.validator.validate(&template)?;

        let first = self.fetch_first_page(&template).await?;
        let run = self.run_from(&template, first, &RunOptions::default()).await?;

        // Rows gathered before a mid-crawl failure are persisted too
        let run_id = self.results.save_run(template_id, &run).await?;

        Ok(ExecutionSummary {
            run_id,
            template_id: template_id.to_string(),
            total_count: run.total_count,
            pages_fetched: run.pages_fetched,
            render_mode: run.render_mode,
            empty_result: run.empty_result,
            warnings: run.warnings,
            errors: run.errors,
            duration_ms: run.duration_ms,
        })
    }

    /// Static HTML of `url` with a `<base href>` so relative assets resolve
    pub async fn proxy_html(&self, url: &str) -> CrawlResult<String> {
        let url = parse_http_url(url)?;
        let page = self.fetcher.fetch_static(&url, self.config.fetch.request_timeout()).await?;
        let base = Url::parse(&page.final_url).unwrap_or(url);
        Ok(inject_base_href(&page.html, &base))
    }

    async fn run_from(
        &self,
        template: &ExtractionTemplate,
        first: FirstPage,
        options: &RunOptions,
    ) -> CrawlResult<ExtractionRun> {
        let start = Instant::now();
        let FirstPage {
            page,
            decision,
            fallback_error,
            ..
        } = first;

        let mut run = self.paginator.run(template, page, options).await?;
        run.render_decision = decision;
        if let Some(error) = fallback_error {
            run.errors.insert(0, error);
        }
        run.duration_ms = start.elapsed().as_millis() as u64;
        Ok(run)
    }

    async fn first_page_run(&self, template: &ExtractionTemplate) -> CrawlResult<(ExtractionRun, Option<String>)> {
        let first = self.fetch_first_page(template).await?;
        let static_html = first
            .static_html
            .clone()
            .or_else(|| (first.page.render_mode == RenderMode::Static).then(|| first.page.html.clone()));

        let mut run = self.engine.extract(&first.page, template).await?;
        run.render_decision = first.decision;
        if let Some(error) = first.fallback_error {
            run.errors.push(error);
        }
        Ok((run, static_html))
    }
}

/// Copy of `template` aimed at `url`; a blank `url` keeps the template's own
fn retarget(template: &ExtractionTemplate, url: &str) -> ExtractionTemplate {
    let mut template = template.clone();
    if !url.trim().is_empty() {
        template.target_url = url.trim().to_string();
    }
    template
}

fn head_tag() -> &'static Regex {
    static HEAD: OnceLock<Regex> = OnceLock::new();
    HEAD.get_or_init(|| Regex::new(r"(?i)<head(\s[^>]*)?>").expect("static regex"))
}

/// Insert `<base href>` right after `<head>`, or at the top without one
pub fn inject_base_href(html: &str, base: &Url) -> String {
    let tag = format!(
        r#"<base href="{}">"#,
        html_escape::encode_double_quoted_attribute(base.as_str())
    );

    match head_tag().find(html) {
        Some(head) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..head.end()]);
            out.push_str(&tag);
            out.push_str(&html[head.end()..]);
            out
        }
        None => format!("{}{}", tag, html),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosisCode;
    use crate::fetcher::browser::testing::FakeLauncher;
    use crate::fetcher::RenderPool;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn listing(page: usize, rows: usize, next: Option<&str>) -> String {
        let items: String = (0..rows)
            .map(|i| format!(r#"<li class="item"><a href="/doc/{page}-{i}">P{page} R{i}</a></li>"#))
            .collect();
        let next = next
            .map(|href| format!(r#"<a class="next" href="{}">Next</a>"#, href))
            .unwrap_or_default();
        format!(
            r#"<html><head><title>List</title></head><body><ul class="list">{}</ul>{}</body></html>"#,
            items, next
        )
    }

    async fn mount_page(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.fetch.max_retries = 0;
        config.fetch.request_timeout_ms = 2_000;
        config.pagination.inter_page_delay_ms = 0;
        config.pagination.per_page_timeout_ms = 2_000;
        config.preview.max_limit = 50;
        config
    }

    fn service_with(fetcher: Fetcher, templates: Arc<InMemoryTemplateStore>, results: Arc<InMemoryResultsStore>) -> CrawlerService {
        CrawlerService::new(test_config(), fetcher, ExtractionEngine::default(), templates, results)
    }

    fn service() -> (CrawlerService, Arc<InMemoryTemplateStore>, Arc<InMemoryResultsStore>) {
        let templates = Arc::new(InMemoryTemplateStore::new());
        let results = Arc::new(InMemoryResultsStore::new());
        let fetcher = Fetcher::new(&test_config()).unwrap();
        (service_with(fetcher, templates.clone(), results.clone()), templates, results)
    }

    fn template(server: &MockServer) -> ExtractionTemplate {
        ExtractionTemplate::ad_hoc(
            format!("{}/list/1", server.uri()),
            "ul.list > li.item",
            [("title", "a"), ("link", "a::attr(href)")],
        )
        .with_pagination(Some("a.next"), Some(5))
    }

    #[tokio::test]
    async fn test_validate_selector_counts_and_samples() {
        let server = MockServer::start().await;
        mount_page(&server, "/list/1", listing(1, 7, None)).await;
        let (service, _, _) = service();

        let url = format!("{}/list/1", server.uri());
        let result = service.validate_selector(&url, "li.item a").await.unwrap();
        assert!(result.valid);
        assert_eq!(result.match_count, 7);
        assert_eq!(result.samples.len(), 5);
        assert_eq!(result.samples[0], "P1 R0");

        let none = service.validate_selector(&url, "div.missing").await.unwrap();
        assert!(!none.valid);
        assert_eq!(none.match_count, 0);

        let broken = service.validate_selector(&url, "li[[").await.unwrap();
        assert!(!broken.valid);
        assert!(broken.error.is_some());
    }

    #[tokio::test]
    async fn test_validate_selector_rejects_bad_url() {
        let (service, _, _) = service();
        let err = service.validate_selector("ftp://example.com", "a").await.unwrap_err();
        assert_eq!(err.code(), "INVALID_URL");
    }

    #[tokio::test]
    async fn test_preview_limit_reports_total() {
        let server = MockServer::start().await;
        mount_page(&server, "/list/1", listing(1, 12, Some("/list/2"))).await;
        let (service, _, _) = service();

        let preview = service.preview(&template(&server), PreviewWindow::Limit(5)).await.unwrap();
        assert_eq!(preview.returned, 5);
        assert_eq!(preview.total, 12);
        assert_eq!(preview.pages_fetched, 1);
    }

    #[tokio::test]
    async fn test_preview_second_page_follows_links() {
        let server = MockServer::start().await;
        mount_page(&server, "/list/1", listing(1, 4, Some("/list/2"))).await;
        mount_page(&server, "/list/2", listing(2, 4, Some("/list/3"))).await;
        mount_page(&server, "/list/3", listing(3, 4, None)).await;
        let (service, _, _) = service();

        let window = PreviewWindow::Page { page: 2, page_size: 3 };
        let preview = service.preview(&template(&server), window).await.unwrap();
        assert_eq!(preview.returned, 3);
        assert_eq!(preview.rows[0].row_index, 3);
        assert_eq!(preview.pages_fetched, 2);
        assert_eq!(preview.total, 8);
    }

    #[tokio::test]
    async fn test_failed_preview_is_diagnosed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let (service, _, _) = service();

        let failure = service
            .preview_or_diagnose(&template(&server), PreviewWindow::Limit(5))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, CrawlError::HttpStatus { status: 404, .. }));
        assert_eq!(failure.diagnosis.code, DiagnosisCode::FetchFailed);
        assert!(!failure.diagnosis.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_diagnose_likely_dynamic() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/list/1",
            r#"<html><body><div id="app"></div><script src="/app.js"></script></body></html>"#.to_string(),
        )
        .await;
        let (service, _, _) = service();

        let url = format!("{}/list/1", server.uri());
        let report = service.diagnose(&url, &template(&server), Some("empty export")).await;
        assert_eq!(report.code, DiagnosisCode::LikelyDynamicContent);
        assert_eq!(report.error_context.as_deref(), Some("empty export"));
    }

    #[tokio::test]
    async fn test_diagnose_container_mismatch() {
        let server = MockServer::start().await;
        let body = format!(
            "<html><body><article>{}</article></body></html>",
            "Plain server-rendered article text. ".repeat(20)
        );
        mount_page(&server, "/list/1", body).await;
        let (service, _, _) = service();

        let url = format!("{}/list/1", server.uri());
        let report = service.diagnose(&url, &template(&server), None).await;
        assert_eq!(report.code, DiagnosisCode::ContainerSelectorMismatch);
    }

    #[tokio::test]
    async fn test_diagnose_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let (service, _, _) = service();

        let url = format!("{}/list/1", server.uri());
        let report = service.diagnose(&url, &template(&server), None).await;
        assert_eq!(report.code, DiagnosisCode::FetchFailed);
    }

    #[tokio::test]
    async fn test_first_page_only_test_run() {
        let server = MockServer::start().await;
        mount_page(&server, "/list/1", listing(1, 3, Some("/list/2"))).await;
        mount_page(&server, "/list/2", listing(2, 3, None)).await;
        let (service, _, _) = service();

        let url = format!("{}/list/1", server.uri());
        let outcome = service.test(&url, &template(&server)).await;
        assert!(outcome.success);
        assert_eq!(outcome.count, 3);
        assert!(outcome.diagnosis.is_none());

        let empty = ExtractionTemplate::ad_hoc(url.clone(), "table tr", [("title", "td")]);
        let outcome = service.test(&url, &empty).await;
        assert!(!outcome.success);
        assert_eq!(outcome.diagnosis.unwrap().code, DiagnosisCode::ContainerSelectorMismatch);
    }

    #[tokio::test]
    async fn test_execute_persists_run() {
        let server = MockServer::start().await;
        mount_page(&server, "/list/1", listing(1, 2, Some("/list/2"))).await;
        mount_page(&server, "/list/2", listing(2, 2, None)).await;
        let (service, templates, results) = service();

        let mut stored = template(&server);
        stored.id = Some("news".to_string());
        templates.insert(stored).unwrap();

        let summary = service.execute("news").await.unwrap();
        assert_eq!(summary.total_count, 4);
        assert_eq!(summary.pages_fetched, 2);

        let saved = results.get(&summary.run_id).unwrap();
        assert_eq!(saved.run.rows.len(), 4);
        assert_eq!(saved.run.rows[3].values["link"], format!("{}/doc/2-1", server.uri()));
    }

    #[tokio::test]
    async fn test_execute_keeps_partial_rows() {
        let server = MockServer::start().await;
        mount_page(&server, "/list/1", listing(1, 2, Some("/list/2"))).await;
        Mock::given(method("GET"))
            .and(path("/list/2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let (service, templates, results) = service();

        let mut stored = template(&server);
        stored.id = Some("news".to_string());
        templates.insert(stored).unwrap();

        let summary = service.execute("news").await.unwrap();
        assert_eq!(summary.total_count, 2);
        assert!(!summary.errors.is_empty());
        assert_eq!(results.runs_for("news").len(), 1);
    }

    #[tokio::test]
    async fn test_execute_unknown_template() {
        let (service, _, _) = service();
        let err = service.execute("missing").await.unwrap_err();
        assert_eq!(err.code(), "TEMPLATE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_auto_mode_renders_dynamic_pages() {
        let server = MockServer::start().await;
        let url = format!("{}/list/1", server.uri());
        mount_page(
            &server,
            "/list/1",
            r#"<html><body><div id="root"></div><script src="/bundle.js"></script></body></html>"#.to_string(),
        )
        .await;

        let launcher = FakeLauncher::new([(url.clone(), listing(1, 3, None))]);
        let pool = Arc::new(RenderPool::new(Arc::new(launcher), 1));
        let fetcher = Fetcher::new(&test_config()).unwrap().with_render_pool(pool);
        let service = service_with(
            fetcher,
            Arc::new(InMemoryTemplateStore::new()),
            Arc::new(InMemoryResultsStore::new()),
        );

        let outcome = service.test(&url, &template(&server)).await;
        assert!(outcome.success);
        assert_eq!(outcome.count, 3);
        assert_eq!(outcome.render_mode, Some(RenderMode::Dynamic));
    }

    #[tokio::test]
    async fn test_proxy_injects_base() {
        let server = MockServer::start().await;
        mount_page(&server, "/page", r#"<html><HEAD lang="en"><title>x</title></HEAD><body></body></html>"#.to_string()).await;
        let (service, _, _) = service();

        let html = service.proxy_html(&format!("{}/page", server.uri())).await.unwrap();
        assert!(html.contains(&format!(r#"<HEAD lang="en"><base href="{}/page">"#, server.uri())));
    }

    #[test]
    fn test_inject_base_without_head() {
        let base = Url::parse("https://example.com/a?b=1&c=2").unwrap();
        let html = inject_base_href("<header>x</header>", &base);
        assert!(html.starts_with(r#"<base href="https://example.com/a?b=1&amp;c=2">"#));
        assert!(html.ends_with("<header>x</header>"));
    }
}
