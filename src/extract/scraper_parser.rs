use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::collections::BTreeMap;

use super::{MatchOutcome, MatchRequest, StructuralParser};
use crate::error::CrawlResult;
use crate::template::{compile_css, FieldSelector};

/// In-process structural parser backed by the `scraper` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct ScraperParser;

impl ScraperParser {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous matching; the parsed document never crosses an await point
    pub fn match_html(request: &MatchRequest) -> CrawlResult<MatchOutcome> {
        let container = compile_css(request.container_selector.trim())?;
        let fields = request
            .fields
            .iter()
            .map(|(name, selector)| {
                let css = if selector.targets_container() {
                    None
                } else {
                    Some(compile_css(&selector.css)?)
                };
                Ok((name.as_str(), css, selector.attribute.as_deref()))
            })
            .collect::<CrawlResult<Vec<_>>>()?;

        let document = Html::parse_document(&request.html);
        let mut container_matches = 0;
        let mut rows = Vec::new();

        for element in document.select(&container) {
            container_matches += 1;
            let row: BTreeMap<String, String> = fields
                .iter()
                .map(|(name, css, attribute)| {
                    let target = match css {
                        Some(css) => element.select(css).next(),
                        None => Some(element),
                    };
                    let value = target.map(|el| read_value(el, *attribute)).unwrap_or_default();
                    (name.to_string(), value)
                })
                .collect();
            rows.push(row);
        }

        Ok(MatchOutcome { container_matches, rows })
    }
}

#[async_trait]
impl StructuralParser for ScraperParser {
    async fn match_rows(&self, request: &MatchRequest) -> CrawlResult<MatchOutcome> {
        Self::match_html(request)
    }

    fn name(&self) -> &'static str {
        "scraper"
    }
}

/// Attribute value (trimmed) or whitespace-collapsed text
fn read_value(element: ElementRef<'_>, attribute: Option<&str>) -> String {
    match attribute {
        Some(name) => element.value().attr(name).map(|v| v.trim().to_string()).unwrap_or_default(),
        None => collapse_text(element),
    }
}

pub fn collapse_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Result of probing a single selector against a page
#[derive(Debug, Clone, Serialize)]
pub struct SelectorProbe {
    pub match_count: usize,
    pub samples: Vec<String>,
}

/// Count matches of `raw_selector` (attribute suffix allowed) and sample values
pub fn probe_selector(html: &str, raw_selector: &str, sample_count: usize, max_chars: usize) -> CrawlResult<SelectorProbe> {
    let selector = FieldSelector::parse(raw_selector);
    let css: Selector = compile_css(if selector.css.is_empty() { "*" } else { &selector.css })?;
    let document = Html::parse_document(html);

    let mut match_count = 0;
    let mut samples = Vec::new();
    for element in document.select(&css) {
        match_count += 1;
        if samples.len() < sample_count {
            let value = read_value(element, selector.attribute.as_deref());
            samples.push(value.chars().take(max_chars).collect());
        }
    }

    Ok(SelectorProbe { match_count, samples })
}
