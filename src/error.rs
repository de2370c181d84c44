use std::fmt;
use thiserror::Error;

/// Error taxonomy for the extraction engine
#[derive(Error, Debug, Clone)]
pub enum CrawlError {
    // Fetch errors
    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP request failed: {url} - {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Fetch timed out after {timeout_ms}ms: {url}")]
    FetchTimeout { url: String, timeout_ms: u64 },

    // Headless rendering errors
    #[error("Render timed out after {timeout_ms}ms: {url}")]
    RenderTimeout { url: String, timeout_ms: u64 },

    #[error("Render backend error: {message}")]
    Render { message: String },

    #[error("Dynamic rendering is not available: {reason}")]
    RenderUnavailable { reason: String },

    // Structural parser errors
    #[error("Structural parser crashed: {message}")]
    ParserCrashed { message: String },

    #[error("Structural parser timed out after {timeout_ms}ms")]
    ParserTimeout { timeout_ms: u64 },

    #[error("Structural parser returned malformed output: {message}")]
    MalformedOutput { message: String },

    // Template and selector errors
    #[error("Invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("Selector matched nothing: {selector} on {url}")]
    SelectorMismatch { selector: String, url: String },

    #[error("Invalid template: {message}")]
    InvalidTemplate { message: String },

    #[error("Template not found: {id}")]
    TemplateNotFound { id: String },

    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    // Infrastructure errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CrawlError {
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network { url: url.into(), message: message.into() }
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::Render { message: message.into() }
    }

    pub fn parser_crashed(message: impl Into<String>) -> Self {
        Self::ParserCrashed { message: message.into() }
    }

    pub fn malformed_output(message: impl Into<String>) -> Self {
        Self::MalformedOutput { message: message.into() }
    }

    pub fn invalid_selector(selector: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSelector { selector: selector.into(), message: message.into() }
    }

    pub fn invalid_template(message: impl Into<String>) -> Self {
        Self::InvalidTemplate { message: message.into() }
    }

    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into(), message: message.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Timeout of any kind: fetch, render or parser deadline
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::FetchTimeout { .. } | Self::RenderTimeout { .. } | Self::ParserTimeout { .. }
        )
    }

    /// Check if retrying the same operation may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::FetchTimeout { .. }
            | Self::RenderTimeout { .. }
            | Self::ParserTimeout { .. } => true,

            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,

            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Network { .. } | Self::HttpStatus { .. } | Self::FetchTimeout { .. } => "network",
            Self::RenderTimeout { .. } | Self::Render { .. } | Self::RenderUnavailable { .. } => "render",
            Self::ParserCrashed { .. } | Self::ParserTimeout { .. } | Self::MalformedOutput { .. } => "parser",
            Self::InvalidSelector { .. }
            | Self::SelectorMismatch { .. }
            | Self::InvalidTemplate { .. }
            | Self::TemplateNotFound { .. }
            | Self::InvalidUrl { .. } => "template",
            Self::Storage { .. } => "storage",
            Self::Configuration { .. } => "configuration",
            Self::Internal { .. } => "internal",
        }
    }

    /// Stable machine-readable code surfaced at the HTTP boundary
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network { .. } => "NETWORK_ERROR",
            Self::HttpStatus { .. } => "HTTP_STATUS",
            Self::FetchTimeout { .. } => "FETCH_TIMEOUT",
            Self::RenderTimeout { .. } => "RENDER_TIMEOUT",
            Self::Render { .. } => "RENDER_ERROR",
            Self::RenderUnavailable { .. } => "RENDER_UNAVAILABLE",
            Self::ParserCrashed { .. } => "PARSER_CRASHED",
            Self::ParserTimeout { .. } => "PARSER_TIMEOUT",
            Self::MalformedOutput { .. } => "MALFORMED_OUTPUT",
            Self::InvalidSelector { .. } => "INVALID_SELECTOR",
            Self::SelectorMismatch { .. } => "SELECTOR_MISMATCH",
            Self::InvalidTemplate { .. } => "INVALID_TEMPLATE",
            Self::TemplateNotFound { .. } => "TEMPLATE_NOT_FOUND",
            Self::InvalidUrl { .. } => "INVALID_URL",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<rusqlite::Error> for CrawlError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage { message: err.to_string() }
    }
}

impl From<anyhow::Error> for CrawlError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal { message: err.to_string() }
    }
}

/// Result type alias for the engine
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;

/// Error context for enhanced debugging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub operation: String,
    pub component: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub request_id: Option<String>,
    pub url: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            component: component.into(),
            timestamp: chrono::Utc::now(),
            request_id: None,
            url: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Error annotated with the operation it escaped from
#[derive(Debug)]
pub struct ContextualError {
    pub error: CrawlError,
    pub context: ErrorContext,
}

impl ContextualError {
    pub fn new(error: CrawlError, context: ErrorContext) -> Self {
        Self { error, context }
    }
}

impl fmt::Display for ContextualError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}::{}", self.error, self.context.component, self.context.operation)?;

        if let Some(url) = &self.context.url {
            write!(f, " (url: {})", url)?;
        }

        if let Some(request_id) = &self.context.request_id {
            write!(f, " [req: {}]", request_id)?;
        }

        Ok(())
    }
}

impl std::error::Error for ContextualError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Macro for creating contextual errors
#[macro_export]
macro_rules! contextual_error {
    ($error:expr, $operation:expr, $component:expr) => {
        $crate::error::ContextualError::new(
            $error,
            $crate::error::ErrorContext::new($operation, $component),
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let error = CrawlError::invalid_template("no fields");
        assert_eq!(error.category(), "template");
        assert_eq!(error.code(), "INVALID_TEMPLATE");
        assert!(!error.is_recoverable());

        let timeout = CrawlError::ParserTimeout { timeout_ms: 100 };
        assert_eq!(timeout.category(), "parser");
        assert!(timeout.is_timeout());
    }

    #[test]
    fn test_recoverable_errors() {
        let network_error = CrawlError::network("https://example.com", "connection refused");
        assert!(network_error.is_recoverable());

        let not_found = CrawlError::HttpStatus { url: "https://example.com".into(), status: 404 };
        assert!(!not_found.is_recoverable());

        let unavailable = CrawlError::HttpStatus { url: "https://example.com".into(), status: 503 };
        assert!(unavailable.is_recoverable());
    }

    #[test]
    fn test_contextual_error() {
        let error = CrawlError::parser_crashed("exit status 1");
        let context = ErrorContext::new("extract", "engine")
            .with_request_id("req-123")
            .with_url("https://example.com");

        let contextual = ContextualError::new(error, context);
        let error_string = contextual.to_string();

        assert!(error_string.contains("engine::extract"));
        assert!(error_string.contains("req-123"));
        assert!(error_string.contains("https://example.com"));
    }
}
