use serde::{Deserialize, Serialize};

use crate::config::PreviewConfig;
use crate::extract::{ExtractedRow, ExtractionRun, RunWarning};
use crate::fetcher::RenderMode;

/// Slice of rows requested by a preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewWindow {
    Limit(usize),
    Page { page: usize, page_size: usize },
}

impl PreviewWindow {
    /// Build from request parameters; `page`/`page_size` win over `limit`
    pub fn from_params(
        limit: Option<usize>,
        page: Option<usize>,
        page_size: Option<usize>,
        config: &PreviewConfig,
    ) -> Self {
        let window = match (page, page_size) {
            (Some(page), size) => PreviewWindow::Page {
                page: page.max(1),
                page_size: size.or(limit).unwrap_or(config.default_limit),
            },
            (None, Some(size)) => PreviewWindow::Page { page: 1, page_size: size },
            (None, None) => PreviewWindow::Limit(limit.unwrap_or(config.default_limit)),
        };
        window.clamped(config.max_limit)
    }

    /// Keep the window size within `1..=max_limit`
    pub fn clamped(self, max_limit: usize) -> Self {
        let max_limit = max_limit.max(1);
        match self {
            PreviewWindow::Limit(limit) => PreviewWindow::Limit(limit.clamp(1, max_limit)),
            PreviewWindow::Page { page, page_size } => PreviewWindow::Page {
                page: page.max(1),
                page_size: page_size.clamp(1, max_limit),
            },
        }
    }

    pub fn offset(&self) -> usize {
        match self {
            PreviewWindow::Limit(_) => 0,
            PreviewWindow::Page { page, page_size } => ((*page).max(1) - 1) * *page_size,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            PreviewWindow::Limit(limit) => *limit,
            PreviewWindow::Page { page_size, .. } => *page_size,
        }
    }

    /// Only windows beyond the first page follow next links
    pub fn needs_pagination(&self) -> bool {
        matches!(self, PreviewWindow::Page { page, .. } if *page > 1)
    }

    /// Rows that must exist before the window can be filled
    pub fn row_target(&self) -> usize {
        self.offset() + self.size()
    }
}

/// Windowed view over an extraction run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewResult {
    pub rows: Vec<ExtractedRow>,
    /// Rows available before slicing
    pub total: usize,
    /// Rows in this window
    pub returned: usize,
    pub window: PreviewWindow,
    pub pages_fetched: usize,
    pub render_mode: RenderMode,
    pub container_matches: usize,
    pub empty_result: bool,
    pub warnings: Vec<RunWarning>,
}

impl PreviewResult {
    pub fn from_run(run: ExtractionRun, window: PreviewWindow) -> Self {
        let total = run.rows.len();
        let rows: Vec<ExtractedRow> = run
            .rows
            .into_iter()
            .skip(window.offset())
            .take(window.size())
            .collect();

        Self {
            returned: rows.len(),
            rows,
            total,
            window,
            pages_fetched: run.pages_fetched,
            render_mode: run.render_mode,
            container_matches: run.container_matches,
            empty_result: run.empty_result,
            warnings: run.warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::PageExtraction;
    use std::collections::BTreeMap;

    fn run_with_rows(n: usize) -> ExtractionRun {
        let rows = (0..n)
            .map(|i| ExtractedRow {
                row_index: i,
                page_number: 1,
                source_url: "https://example.com".to_string(),
                values: BTreeMap::from([("title".to_string(), format!("row {}", i))]),
            })
            .collect();
        let mut run = ExtractionRun::new(RenderMode::Static);
        run.push_page(PageExtraction { container_matches: n, rows });
        run
    }

    #[test]
    fn test_limit_window_reports_total() {
        let preview = PreviewResult::from_run(run_with_rows(12), PreviewWindow::Limit(5));

        assert_eq!(preview.returned, 5);
        assert_eq!(preview.rows.len(), 5);
        assert_eq!(preview.total, 12);
        assert_eq!(preview.rows[4].row_index, 4);
    }

    #[test]
    fn test_page_window_slices() {
        let window = PreviewWindow::Page { page: 3, page_size: 5 };
        assert!(window.needs_pagination());
        assert_eq!(window.row_target(), 15);

        let preview = PreviewResult::from_run(run_with_rows(12), window);
        assert_eq!(preview.returned, 2);
        assert_eq!(preview.rows[0].row_index, 10);
        assert_eq!(preview.total, 12);
    }

    #[test]
    fn test_window_beyond_rows_is_empty() {
        let preview = PreviewResult::from_run(run_with_rows(3), PreviewWindow::Page { page: 4, page_size: 5 });
        assert_eq!(preview.returned, 0);
        assert_eq!(preview.total, 3);
    }

    #[test]
    fn test_from_params_clamps() {
        let config = PreviewConfig {
            default_limit: 10,
            max_limit: 50,
            ..PreviewConfig::default()
        };

        assert_eq!(PreviewWindow::from_params(None, None, None, &config), PreviewWindow::Limit(10));
        assert_eq!(PreviewWindow::from_params(Some(500), None, None, &config), PreviewWindow::Limit(50));
        assert_eq!(PreviewWindow::from_params(Some(0), None, None, &config), PreviewWindow::Limit(1));
        assert_eq!(
            PreviewWindow::from_params(None, Some(2), Some(20), &config),
            PreviewWindow::Page { page: 2, page_size: 20 }
        );
        assert!(!PreviewWindow::from_params(None, Some(1), Some(20), &config).needs_pagination());
    }
}
