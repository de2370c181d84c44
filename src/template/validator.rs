use std::collections::HashSet;
use tracing::debug;
use url::Url;

use super::selector::{compile_css, is_valid_attribute_name};
use super::ExtractionTemplate;
use crate::error::{CrawlError, CrawlResult};

/// Template validator
pub struct TemplateValidator {
    allowed_schemes: HashSet<&'static str>,
}

impl Default for TemplateValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateValidator {
    pub fn new() -> Self {
        Self {
            allowed_schemes: ["http", "https"].into_iter().collect(),
        }
    }

    /// Validate a template before any fetch happens
    pub fn validate(&self, template: &ExtractionTemplate) -> CrawlResult<()> {
        debug!("Validating template {}", template.display_name());

        self.validate_target_url(&template.target_url)?;
        self.validate_container(&template.container_selector)?;
        self.validate_fields(template)?;
        self.validate_pagination(template)?;

        if let Some(wait_selector) = &template.wait_selector {
            if !wait_selector.trim().is_empty() {
                compile_css(wait_selector)?;
            }
        }

        Ok(())
    }

    pub fn validate_target_url(&self, target_url: &str) -> CrawlResult<Url> {
        let url = Url::parse(target_url.trim()).map_err(|e| CrawlError::invalid_url(target_url, e.to_string()))?;

        if !self.allowed_schemes.contains(url.scheme()) {
            return Err(CrawlError::invalid_url(
                target_url,
                "URL must use HTTP or HTTPS scheme",
            ));
        }

        if url.host_str().is_none() {
            return Err(CrawlError::invalid_url(target_url, "URL has no host"));
        }

        Ok(url)
    }

    fn validate_container(&self, container: &str) -> CrawlResult<()> {
        if container.trim().is_empty() {
            return Err(CrawlError::invalid_template("Container selector cannot be empty"));
        }
        compile_css(container.trim())?;
        Ok(())
    }

    fn validate_fields(&self, template: &ExtractionTemplate) -> CrawlResult<()> {
        if template.fields.is_empty() {
            return Err(CrawlError::invalid_template("At least one field must be defined"));
        }

        let mut names = HashSet::new();
        for field in &template.fields {
            let name = field.name.trim();
            if name.is_empty() {
                return Err(CrawlError::invalid_template("Field name cannot be empty"));
            }
            if !names.insert(name) {
                return Err(CrawlError::invalid_template(format!("Duplicate field name: {}", name)));
            }

            let selector = field.field_selector();
            // Empty css addresses the container itself
            if !selector.targets_container() {
                compile_css(&selector.css)?;
            }
            if let Some(attribute) = &selector.attribute {
                if !is_valid_attribute_name(attribute) {
                    return Err(CrawlError::invalid_template(format!(
                        "Invalid attribute name '{}' on field {}",
                        attribute, name
                    )));
                }
            }
        }

        Ok(())
    }

    fn validate_pagination(&self, template: &ExtractionTemplate) -> CrawlResult<()> {
        let pagination = &template.pagination;

        if pagination.max_pages == Some(0) {
            return Err(CrawlError::invalid_template("Max pages must be greater than 0"));
        }

        if let Some(next_selector) = &pagination.next_selector {
            if !next_selector.trim().is_empty() {
                compile_css(next_selector.trim())?;
            }
        }

        Ok(())
    }
}
