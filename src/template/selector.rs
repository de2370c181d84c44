use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::{CrawlError, CrawlResult};

fn attr_suffix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(.*?)::attr\(\s*([^)]*?)\s*\)\s*$").expect("static attribute-suffix pattern")
    })
}

/// Field selector split into its CSS part and an optional attribute
///
/// `a.title::attr(href)` reads the `href` attribute of the first `a.title`
/// inside the container; an empty CSS part addresses the container itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelector {
    pub css: String,
    pub attribute: Option<String>,
}

impl FieldSelector {
    /// Parse the `<css>::attr(<name>)` notation
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match attr_suffix().captures(raw) {
            Some(caps) => {
                let attribute = caps[2].trim().trim_matches(|c: char| c == '"' || c == '\'').to_string();
                Self {
                    css: caps[1].trim().to_string(),
                    attribute: (!attribute.is_empty()).then_some(attribute),
                }
            }
            None => Self {
                css: raw.to_string(),
                attribute: None,
            },
        }
    }

    pub fn with_attribute(css: impl Into<String>, attribute: Option<String>) -> Self {
        let parsed = Self::parse(&css.into());
        Self {
            attribute: attribute.filter(|a| !a.trim().is_empty()).or(parsed.attribute),
            css: parsed.css,
        }
    }

    pub fn targets_container(&self) -> bool {
        self.css.is_empty()
    }

    /// Attribute values that are links and must be made absolute
    pub fn is_link_attribute(&self) -> bool {
        matches!(self.attribute.as_deref(), Some("href") | Some("src"))
    }

    /// Render back into the wire notation used by the subprocess bridge
    pub fn to_wire(&self) -> String {
        match &self.attribute {
            Some(attr) => format!("{}::attr({})", self.css, attr),
            None => self.css.clone(),
        }
    }
}

/// Compile a CSS selector, mapping failures to a typed error
pub fn compile_css(selector: &str) -> CrawlResult<Selector> {
    Selector::parse(selector).map_err(|e| CrawlError::invalid_selector(selector, e.to_string()))
}

/// Attribute names accepted in `::attr(...)`
pub fn is_valid_attribute_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_:][-A-Za-z0-9_:.]*$").expect("static attribute pattern"))
        .is_match(name)
}
