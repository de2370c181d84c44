use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use url::Url;

pub mod dates;
pub mod scraper_parser;
pub mod subprocess;

pub use dates::{is_date_field, normalize_date};
pub use scraper_parser::{probe_selector, ScraperParser, SelectorProbe};
pub use subprocess::SubprocessParser;

use crate::classifier::RenderDecision;
use crate::config::{ParserBackend, ParserConfig};
use crate::error::CrawlResult;
use crate::fetcher::{FetchResult, RenderMode};
use crate::template::{ExtractionTemplate, FieldSelector};

/// Selector matching request handed to a structural parser
#[derive(Debug, Clone)]
pub struct MatchRequest {
    pub html: String,
    pub container_selector: String,
    /// Field name and selector, in template order
    pub fields: Vec<(String, FieldSelector)>,
    pub base_url: Option<String>,
}

/// Raw parser result: one value map per matched container
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub container_matches: usize,
    pub rows: Vec<BTreeMap<String, String>>,
}

/// Narrow seam between the engine and whatever performs selector matching
#[async_trait]
pub trait StructuralParser: Send + Sync {
    async fn match_rows(&self, request: &MatchRequest) -> CrawlResult<MatchOutcome>;

    fn name(&self) -> &'static str;
}

/// One extracted record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRow {
    pub row_index: usize,
    pub page_number: usize,
    pub source_url: String,
    pub values: BTreeMap<String, String>,
}

/// Non-fatal conditions recorded during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    PaginationLoopDetected { url: String },
    MaxPagesReached { max_pages: usize },
    CrawlBudgetExhausted { elapsed_ms: u64 },
    PageFailed { page_number: usize, url: String, message: String },
}

/// Result of running a template over one or more pages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRun {
    pub rows: Vec<ExtractedRow>,
    pub total_count: usize,
    pub pages_fetched: usize,
    pub render_mode: RenderMode,
    /// Container matches on the first page
    pub container_matches: usize,
    pub empty_result: bool,
    pub render_decision: Option<RenderDecision>,
    pub warnings: Vec<RunWarning>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl ExtractionRun {
    pub fn new(render_mode: RenderMode) -> Self {
        Self {
            rows: Vec::new(),
            total_count: 0,
            pages_fetched: 0,
            render_mode,
            container_matches: 0,
            empty_result: true,
            render_decision: None,
            warnings: Vec::new(),
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Append one page's rows, continuing the global row index
    pub fn push_page(&mut self, page: PageExtraction) {
        if self.pages_fetched == 0 {
            self.container_matches = page.container_matches;
        }
        self.pages_fetched += 1;
        self.rows.extend(page.rows);
        self.total_count = self.rows.len();
        self.empty_result = self.rows.is_empty();
    }

    pub fn next_row_index(&self) -> usize {
        self.rows.len()
    }

    pub fn has_warning(&self, predicate: impl Fn(&RunWarning) -> bool) -> bool {
        self.warnings.iter().any(predicate)
    }
}

/// Rows extracted from a single page
#[derive(Debug, Clone)]
pub struct PageExtraction {
    pub container_matches: usize,
    pub rows: Vec<ExtractedRow>,
}

/// Runs templates against HTML through a structural parser
#[derive(Clone)]
pub struct ExtractionEngine {
    parser: Arc<dyn StructuralParser>,
}

impl ExtractionEngine {
    pub fn new(parser: Arc<dyn StructuralParser>) -> Self {
        Self { parser }
    }

    pub fn from_config(config: &ParserConfig) -> CrawlResult<Self> {
        let parser: Arc<dyn StructuralParser> = match config.backend {
            ParserBackend::InProcess => Arc::new(ScraperParser::new()),
            ParserBackend::Subprocess => Arc::new(SubprocessParser::from_config(config)?),
        };
        Ok(Self::new(parser))
    }

    pub fn parser_name(&self) -> &'static str {
        self.parser.name()
    }

    /// Extract a single page into a fresh run
    pub async fn extract(&self, page: &FetchResult, template: &ExtractionTemplate) -> CrawlResult<ExtractionRun> {
        let start = Instant::now();
        let extraction = self.extract_page(page, template, 1, 0).await?;

        let mut run = ExtractionRun::new(page.render_mode);
        run.push_page(extraction);
        run.duration_ms = start.elapsed().as_millis() as u64;
        Ok(run)
    }

    /// Extract one page of a larger run
    ///
    /// Rows are numbered from `first_row_index`; link attributes are resolved
    /// against the page's final URL.
    pub async fn extract_page(
        &self,
        page: &FetchResult,
        template: &ExtractionTemplate,
        page_number: usize,
        first_row_index: usize,
    ) -> CrawlResult<PageExtraction> {
        let fields: Vec<(String, FieldSelector)> = template
            .fields
            .iter()
            .map(|field| (field.name.clone(), field.field_selector()))
            .collect();

        let request = MatchRequest {
            html: page.html.clone(),
            container_selector: template.container_selector.trim().to_string(),
            fields,
            base_url: Some(page.final_url.clone()),
        };

        let outcome = self.parser.match_rows(&request).await?;
        let base = Url::parse(&page.final_url).ok();

        debug!(
            "Parser '{}' matched {} container(s) on page {} ({})",
            self.parser.name(),
            outcome.container_matches,
            page_number,
            page.final_url
        );

        let rows = outcome
            .rows
            .into_iter()
            .enumerate()
            .map(|(offset, mut values)| {
                if let Some(base) = &base {
                    for (name, selector) in &request.fields {
                        if selector.is_link_attribute() {
                            if let Some(value) = values.get_mut(name) {
                                *value = resolve_link(base, value);
                            }
                        }
                    }
                }
                for (name, selector) in &request.fields {
                    // Fields the parser omitted read as empty
                    let value = values.entry(name.clone()).or_default();
                    if !selector.is_link_attribute() && is_date_field(name) && !value.is_empty() {
                        *value = normalize_date(value);
                    }
                }
                ExtractedRow {
                    row_index: first_row_index + offset,
                    page_number,
                    source_url: page.final_url.clone(),
                    values,
                }
            })
            .collect();

        Ok(PageExtraction {
            container_matches: outcome.container_matches,
            rows,
        })
    }
}

impl Default for ExtractionEngine {
    fn default() -> Self {
        Self::new(Arc::new(ScraperParser::new()))
    }
}

/// Resolve a link value against `base`, leaving non-navigational values alone
pub fn resolve_link(base: &Url, value: &str) -> String {
    let trimmed = value.trim();
    let lower = trimmed.to_ascii_lowercase();
    if trimmed.is_empty()
        || trimmed.starts_with('#')
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
    {
        return trimmed.to_string();
    }

    base.join(trimmed).map(|u| u.to_string()).unwrap_or_else(|_| trimmed.to_string())
}
