//! Selector Crawler - template-driven web extraction
//!
//! This library provides:
//! - Declarative extraction templates with CSS selectors and `::attr()` fields
//! - Static HTTP fetching and pooled headless rendering
//! - Render-mode classification, pagination and diagnostics
//! - SQLite-backed template and result stores

pub mod classifier;
pub mod config;
pub mod core;
pub mod diagnostics;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod logging;
pub mod paginator;
pub mod storage;
pub mod template;

#[cfg(feature = "api")]
pub mod api;

// Re-export main types for convenience
pub use crate::config::AppConfig;
pub use crate::core::CrawlerService;
pub use crate::error::{ContextualError, CrawlError, CrawlResult};
pub use crate::template::ExtractionTemplate;
