use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub mod preview;

pub use preview::{PreviewResult, PreviewWindow};

use crate::classifier::{RenderDecision, RenderModeClassifier};
use crate::error::CrawlError;
use crate::extract::{ExtractionRun, RunWarning};
use crate::fetcher::RenderMode;
use crate::template::ExtractionTemplate;

/// Diagnosis codes, most specific first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosisCode {
    LikelyDynamicContent,
    FieldSelectorMismatch,
    ContainerSelectorMismatch,
    Ok,
    FetchFailed,
    RenderTimeout,
    ParserFailure,
    InvalidTemplate,
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisIssue {
    pub code: DiagnosisCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_field: Option<String>,
}

impl DiagnosisIssue {
    fn new(code: DiagnosisCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            affected_field: None,
        }
    }
}

/// Operator-facing explanation of a run or failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisReport {
    pub url: String,
    pub code: DiagnosisCode,
    pub conclusive: bool,
    pub issues: Vec<DiagnosisIssue>,
    pub recommendations: Vec<String>,
    pub suspected_render_mode: Option<RenderMode>,
    pub render_decision: Option<RenderDecision>,
    pub container_matches: Option<usize>,
    pub rows_examined: usize,
    pub error_context: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl DiagnosisReport {
    fn new(url: &str, error_context: Option<&str>) -> Self {
        Self {
            url: url.to_string(),
            code: DiagnosisCode::Inconclusive,
            conclusive: false,
            issues: Vec::new(),
            recommendations: Vec::new(),
            suspected_render_mode: None,
            render_decision: None,
            container_matches: None,
            rows_examined: 0,
            error_context: error_context.map(str::to_string).filter(|c| !c.trim().is_empty()),
            generated_at: Utc::now(),
        }
    }

    fn conclude(&mut self, issue: DiagnosisIssue) {
        if self.issues.is_empty() {
            self.code = issue.code;
            self.conclusive = issue.code != DiagnosisCode::Inconclusive;
        }
        self.issues.push(issue);
    }

    fn recommend(&mut self, text: impl Into<String>) {
        self.recommendations.push(text.into());
    }
}

/// What the diagnosis is about: a finished run or the error that stopped it
#[derive(Debug, Clone, Copy)]
pub enum RunOutcome<'a> {
    Completed {
        run: &'a ExtractionRun,
        /// Static HTML of the first page, when one was fetched
        static_html: Option<&'a str>,
    },
    Failed(&'a CrawlError),
}

/// Classifies extraction results for operators
#[derive(Clone)]
pub struct Diagnostician {
    classifier: Arc<dyn RenderModeClassifier>,
}

impl Diagnostician {
    pub fn new(classifier: Arc<dyn RenderModeClassifier>) -> Self {
        Self { classifier }
    }

    /// Build a report; never fails
    pub fn diagnose(
        &self,
        url: &str,
        template: &ExtractionTemplate,
        outcome: RunOutcome<'_>,
        error_context: Option<&str>,
    ) -> DiagnosisReport {
        let mut report = DiagnosisReport::new(url, error_context);

        match outcome {
            RunOutcome::Completed { run, static_html } => self.diagnose_run(&mut report, template, run, static_html),
            RunOutcome::Failed(error) => diagnose_failure(&mut report, error),
        }

        if report.issues.is_empty() {
            report.conclude(DiagnosisIssue::new(
                DiagnosisCode::Inconclusive,
                "Not enough information to classify this result",
            ));
        }

        debug!("Diagnosis for {}: {:?} ({} issue(s))", url, report.code, report.issues.len());
        report
    }

    fn diagnose_run(
        &self,
        report: &mut DiagnosisReport,
        template: &ExtractionTemplate,
        run: &ExtractionRun,
        static_html: Option<&str>,
    ) {
        report.container_matches = Some(run.container_matches);
        report.rows_examined = run.rows.len();

        let decision = run.render_decision.clone().or_else(|| {
            static_html.map(|html| self.classifier.decide(html, &template.container_selector))
        });
        report.suspected_render_mode = decision.as_ref().map(|d| {
            if d.needs_dynamic {
                RenderMode::Dynamic
            } else {
                RenderMode::Static
            }
        });
        report.render_decision = decision.clone();

        if run.container_matches == 0 {
            match (run.render_mode, decision) {
                (RenderMode::Static, Some(decision)) if decision.needs_dynamic => {
                    report.conclude(DiagnosisIssue::new(
                        DiagnosisCode::LikelyDynamicContent,
                        format!(
                            "Container '{}' matched nothing in the static HTML and the page shows signs of script rendering",
                            template.container_selector
                        ),
                    ));
                    report.recommend("Enable dynamic rendering for this template (render_mode: dynamic)");
                    report.recommend("Set a wait_selector that appears once the list has rendered");
                }
                (RenderMode::Static, None) => {
                    report.conclude(DiagnosisIssue::new(
                        DiagnosisCode::Inconclusive,
                        "Container matched nothing and no static HTML was available to inspect",
                    ));
                }
                (mode, _) => {
                    let suffix = if mode == RenderMode::Dynamic {
                        " even after headless rendering"
                    } else {
                        ""
                    };
                    report.conclude(DiagnosisIssue::new(
                        DiagnosisCode::ContainerSelectorMismatch,
                        format!("Container '{}' matched nothing{}", template.container_selector, suffix),
                    ));
                    report.recommend("Check the container selector against the current page markup");
                    report.recommend("Use validate-selector to count matches for candidate selectors");
                }
            }
        } else {
            for field in &template.fields {
                let all_empty = !run.rows.is_empty()
                    && run
                        .rows
                        .iter()
                        .all(|row| row.values.get(&field.name).map_or(true, |v| v.trim().is_empty()));
                if all_empty {
                    report.conclude(DiagnosisIssue {
                        code: DiagnosisCode::FieldSelectorMismatch,
                        message: format!(
                            "Field '{}' ('{}') is empty in all {} row(s)",
                            field.name,
                            field.selector,
                            run.rows.len()
                        ),
                        affected_field: Some(field.name.clone()),
                    });
                }
            }
            if report.issues.is_empty() {
                report.conclude(DiagnosisIssue::new(
                    DiagnosisCode::Ok,
                    format!("{} row(s) extracted from {} page(s)", run.total_count, run.pages_fetched),
                ));
            } else {
                report.recommend("Field selectors are evaluated relative to each container element");
            }
        }

        for warning in &run.warnings {
            match warning {
                RunWarning::PaginationLoopDetected { url } => {
                    report.recommend(format!("Next-page selector leads back to an already visited page ({})", url))
                }
                RunWarning::MaxPagesReached { max_pages } => {
                    report.recommend(format!("Crawl stopped at the {}-page cap; raise max_pages to go further", max_pages))
                }
                RunWarning::CrawlBudgetExhausted { elapsed_ms } => {
                    report.recommend(format!("Crawl ran out of time after {}ms", elapsed_ms))
                }
                RunWarning::PageFailed { page_number, message, .. } => {
                    report.recommend(format!("Page {} failed: {}", page_number, message))
                }
            }
        }
    }
}

fn diagnose_failure(report: &mut DiagnosisReport, error: &CrawlError) {
    let (code, recommendation) = match error {
        CrawlError::Network { .. } | CrawlError::HttpStatus { .. } | CrawlError::FetchTimeout { .. } => (
            DiagnosisCode::FetchFailed,
            "Check that the URL is reachable from this host and not blocking automated clients",
        ),
        CrawlError::InvalidUrl { .. } => (DiagnosisCode::FetchFailed, "Use an absolute http(s) URL"),
        CrawlError::RenderTimeout { .. } => (
            DiagnosisCode::RenderTimeout,
            "The page did not finish rendering in time; use a more specific wait_selector or raise render.timeout_ms",
        ),
        CrawlError::Render { .. } | CrawlError::RenderUnavailable { .. } => (
            DiagnosisCode::FetchFailed,
            "Headless rendering failed; check the browser backend or try static mode",
        ),
        CrawlError::ParserCrashed { .. } | CrawlError::ParserTimeout { .. } | CrawlError::MalformedOutput { .. } => (
            DiagnosisCode::ParserFailure,
            "The structural parser failed; check the parser program or switch to the in-process backend",
        ),
        CrawlError::InvalidTemplate { .. } | CrawlError::InvalidSelector { .. } => {
            (DiagnosisCode::InvalidTemplate, "Fix the template before running it")
        }
        _ => (DiagnosisCode::Inconclusive, "Retry and check the service logs"),
    };

    report.conclude(DiagnosisIssue::new(code, error.to_string()));
    report.recommend(recommendation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::HeuristicClassifier;
    use crate::extract::{ExtractedRow, PageExtraction};
    use std::collections::BTreeMap;

    const SPA_SHELL: &str = r#"<html><body><div id="app"></div><script src="/app.js"></script></body></html>"#;

    fn rendered_static_page() -> String {
        let paragraphs: String = (0..15)
            .map(|i| format!("<p>Department press release number {} with full text content.</p>", i))
            .collect();
        format!("<html><body><article>{}</article></body></html>", paragraphs)
    }

    fn diagnostician() -> Diagnostician {
        Diagnostician::new(Arc::new(HeuristicClassifier::default()))
    }

    fn template() -> ExtractionTemplate {
        ExtractionTemplate::ad_hoc(
            "https://example.com/list",
            "ul.news > li",
            [("title", "a"), ("date", "span.date")],
        )
    }

    fn run(rows: Vec<BTreeMap<String, String>>, mode: RenderMode) -> ExtractionRun {
        let mut run = ExtractionRun::new(mode);
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, values)| ExtractedRow {
                row_index: i,
                page_number: 1,
                source_url: "https://example.com/list".to_string(),
                values,
            })
            .collect::<Vec<_>>();
        run.push_page(PageExtraction {
            container_matches: rows.len(),
            rows,
        });
        run
    }

    fn row(title: &str, date: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("title".to_string(), title.to_string()),
            ("date".to_string(), date.to_string()),
        ])
    }

    #[test]
    fn test_spa_shell_is_likely_dynamic() {
        let empty = run(Vec::new(), RenderMode::Static);
        let report = diagnostician().diagnose(
            "https://example.com/list",
            &template(),
            RunOutcome::Completed { run: &empty, static_html: Some(SPA_SHELL) },
            None,
        );

        assert_eq!(report.code, DiagnosisCode::LikelyDynamicContent);
        assert!(report.conclusive);
        assert_eq!(report.suspected_render_mode, Some(RenderMode::Dynamic));
        assert!(!report.recommendations.is_empty());
    }

    #[test]
    fn test_static_page_without_content_is_container_mismatch() {
        let empty = run(Vec::new(), RenderMode::Static);
        let html = rendered_static_page();
        let report = diagnostician().diagnose(
            "https://example.com/list",
            &template(),
            RunOutcome::Completed { run: &empty, static_html: Some(html.as_str()) },
            None,
        );

        assert_eq!(report.code, DiagnosisCode::ContainerSelectorMismatch);
        assert_eq!(report.suspected_render_mode, Some(RenderMode::Static));
    }

    #[test]
    fn test_field_empty_in_every_row() {
        let result = run(vec![row("A", ""), row("B", " ")], RenderMode::Static);
        let report = diagnostician().diagnose(
            "https://example.com/list",
            &template(),
            RunOutcome::Completed { run: &result, static_html: None },
            None,
        );

        assert_eq!(report.code, DiagnosisCode::FieldSelectorMismatch);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].affected_field.as_deref(), Some("date"));
    }

    #[test]
    fn test_partially_empty_field_is_ok() {
        let result = run(vec![row("A", ""), row("B", "2024-01-02")], RenderMode::Static);
        let report = diagnostician().diagnose(
            "https://example.com/list",
            &template(),
            RunOutcome::Completed { run: &result, static_html: None },
            None,
        );

        assert_eq!(report.code, DiagnosisCode::Ok);
        assert_eq!(report.rows_examined, 2);
    }

    #[test]
    fn test_failures_are_classified() {
        let d = diagnostician();
        let cases = [
            (CrawlError::FetchTimeout { url: "u".into(), timeout_ms: 100 }, DiagnosisCode::FetchFailed),
            (CrawlError::RenderTimeout { url: "u".into(), timeout_ms: 100 }, DiagnosisCode::RenderTimeout),
            (CrawlError::malformed_output("eof"), DiagnosisCode::ParserFailure),
            (CrawlError::invalid_template("no fields"), DiagnosisCode::InvalidTemplate),
            (CrawlError::storage("disk full"), DiagnosisCode::Inconclusive),
        ];

        for (error, expected) in cases {
            let report = d.diagnose("u", &template(), RunOutcome::Failed(&error), None);
            assert_eq!(report.code, expected, "{}", error);
        }
    }

    #[test]
    fn test_error_context_is_echoed() {
        let error = CrawlError::network("https://example.com", "connection reset");
        let report = diagnostician().diagnose(
            "https://example.com",
            &template(),
            RunOutcome::Failed(&error),
            Some("scheduled run at 02:00 failed"),
        );

        assert_eq!(report.error_context.as_deref(), Some("scheduled run at 02:00 failed"));
        assert!(report.issues[0].message.contains("connection reset"));
    }

    #[test]
    fn test_missing_static_html_is_inconclusive() {
        let empty = run(Vec::new(), RenderMode::Static);
        let report = diagnostician().diagnose(
            "https://example.com/list",
            &template(),
            RunOutcome::Completed { run: &empty, static_html: None },
            None,
        );

        assert_eq!(report.code, DiagnosisCode::Inconclusive);
        assert!(!report.conclusive);
    }

    #[test]
    fn test_dynamic_run_with_no_containers_is_mismatch() {
        let empty = run(Vec::new(), RenderMode::Dynamic);
        let report = diagnostician().diagnose(
            "https://example.com/list",
            &template(),
            RunOutcome::Completed { run: &empty, static_html: Some(SPA_SHELL) },
            None,
        );

        assert_eq!(report.code, DiagnosisCode::ContainerSelectorMismatch);
        assert!(report.issues[0].message.contains("headless"));
    }
}
