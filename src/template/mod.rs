use serde::{Deserialize, Serialize};

use crate::error::{CrawlError, CrawlResult};

pub mod selector;
pub mod validator;

pub use selector::{compile_css, FieldSelector};
pub use validator::TemplateValidator;

/// Declarative extraction template
///
/// Owned by the template store; the engine only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionTemplate {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(alias = "targetUrl", alias = "url")]
    pub target_url: String,
    #[serde(alias = "containerSelector", alias = "container")]
    pub container_selector: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub pagination: PaginationSpec,
    #[serde(default, alias = "waitSelector")]
    pub wait_selector: Option<String>,
    #[serde(default, alias = "renderMode")]
    pub render_mode: RenderModeOverride,
}

/// One named value extracted from each container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub attribute: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
            attribute: None,
        }
    }

    /// Selector with the attribute suffix (or explicit attribute) split out
    pub fn field_selector(&self) -> FieldSelector {
        FieldSelector::with_attribute(self.selector.clone(), self.attribute.clone())
    }
}

/// Pagination configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, alias = "nextSelector")]
    pub next_selector: Option<String>,
    #[serde(default, alias = "maxPages")]
    pub max_pages: Option<usize>,
}

/// Per-template render mode override
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderModeOverride {
    #[default]
    Auto,
    Static,
    Dynamic,
}

impl ExtractionTemplate {
    /// Build a one-off template from a container and `(name, selector)` pairs
    pub fn ad_hoc<I, N, S>(target_url: impl Into<String>, container: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        Self {
            id: None,
            name: String::new(),
            target_url: target_url.into(),
            container_selector: container.into(),
            fields: fields
                .into_iter()
                .map(|(name, selector)| FieldSpec::new(name, selector))
                .collect(),
            pagination: PaginationSpec::default(),
            wait_selector: None,
            render_mode: RenderModeOverride::Auto,
        }
    }

    pub fn with_pagination(mut self, next_selector: Option<&str>, max_pages: Option<usize>) -> Self {
        self.pagination = PaginationSpec {
            enabled: true,
            next_selector: next_selector.map(str::to_string),
            max_pages,
        };
        self
    }

    pub fn from_json(content: &str) -> CrawlResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| CrawlError::invalid_template(format!("Failed to parse template JSON: {}", e)))
    }

    pub fn from_yaml(content: &str) -> CrawlResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| CrawlError::invalid_template(format!("Failed to parse template YAML: {}", e)))
    }

    /// Parse by file extension, falling back to JSON then YAML
    pub fn from_file(path: &std::path::Path) -> CrawlResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CrawlError::invalid_template(format!("Failed to read {}: {}", path.display(), e)))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            Some("json") => Self::from_json(&content),
            _ => Self::from_json(&content).or_else(|_| Self::from_yaml(&content)),
        }
    }

    pub fn validate(&self) -> CrawlResult<()> {
        TemplateValidator::new().validate(self)
    }

    pub fn display_name(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else {
            self.id.as_deref().unwrap_or("<ad-hoc>")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_accepts_camel_case() {
        let template = ExtractionTemplate::from_json(
            r#"{
                "id": "notices",
                "targetUrl": "https://x.gov/list/",
                "containerSelector": "ul.list > li",
                "fields": [
                    {"name": "title", "selector": "a"},
                    {"name": "link", "selector": "a::attr(href)"}
                ],
                "pagination": {"enabled": true, "nextSelector": "a.next", "maxPages": 3}
            }"#,
        )
        .unwrap();

        assert_eq!(template.container_selector, "ul.list > li");
        assert_eq!(template.fields.len(), 2);
        assert_eq!(template.pagination.max_pages, Some(3));
        assert_eq!(template.render_mode, RenderModeOverride::Auto);
        assert_eq!(template.fields[1].field_selector().attribute.as_deref(), Some("href"));
    }

    #[test]
    fn test_from_yaml() {
        let template = ExtractionTemplate::from_yaml(
            "target_url: https://example.com/news\n\
             container_selector: div.item\n\
             render_mode: dynamic\n\
             wait_selector: div.item\n\
             fields:\n  - name: title\n    selector: h2\n",
        )
        .unwrap();

        assert_eq!(template.render_mode, RenderModeOverride::Dynamic);
        assert_eq!(template.wait_selector.as_deref(), Some("div.item"));
        assert!(!template.pagination.enabled);
    }

    #[test]
    fn test_malformed_json_is_invalid_template() {
        let err = ExtractionTemplate::from_json("{not json").unwrap_err();
        assert_eq!(err.code(), "INVALID_TEMPLATE");
    }

    #[test]
    fn test_ad_hoc_template() {
        let template = ExtractionTemplate::ad_hoc("https://example.com", "li", [("title", "a")])
            .with_pagination(Some("a.next"), Some(2));
        assert_eq!(template.display_name(), "<ad-hoc>");
        assert!(template.pagination.enabled);
        assert!(template.validate().is_ok());
    }
}
