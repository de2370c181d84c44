use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{CrawlError, CrawlResult};
use crate::extract::ExtractionRun;
use crate::template::ExtractionTemplate;

/// Read side of the template collaborator
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get_template(&self, id: &str) -> CrawlResult<ExtractionTemplate>;
}

/// Sink for completed runs
#[async_trait]
pub trait ResultsStore: Send + Sync {
    /// Persist `run` and return its run id
    async fn save_run(&self, template_id: &str, run: &ExtractionRun) -> CrawlResult<String>;
}

/// A run as kept by a results store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRun {
    pub run_id: String,
    pub template_id: String,
    pub saved_at: DateTime<Utc>,
    pub run: ExtractionRun,
}

/// Template store held in memory, seeded by the embedding application
#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: DashMap<String, ExtractionTemplate>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template under its id; templates without an id are rejected
    pub fn insert(&self, template: ExtractionTemplate) -> CrawlResult<()> {
        let id = template
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| CrawlError::invalid_template("Template id is required"))?;
        self.templates.insert(id, template);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn get_template(&self, id: &str) -> CrawlResult<ExtractionTemplate> {
        self.templates
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CrawlError::TemplateNotFound { id: id.to_string() })
    }
}

/// Results store held in memory
#[derive(Default)]
pub struct InMemoryResultsStore {
    runs: DashMap<String, StoredRun>,
}

impl InMemoryResultsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, run_id: &str) -> Option<StoredRun> {
        self.runs.get(run_id).map(|entry| entry.value().clone())
    }

    /// Runs of a template, oldest first
    pub fn runs_for(&self, template_id: &str) -> Vec<StoredRun> {
        let mut runs: Vec<StoredRun> = self
            .runs
            .iter()
            .filter(|entry| entry.value().template_id == template_id)
            .map(|entry| entry.value().clone())
            .collect();
        runs.sort_by_key(|run| run.saved_at);
        runs
    }
}

#[async_trait]
impl ResultsStore for InMemoryResultsStore {
    async fn save_run(&self, template_id: &str, run: &ExtractionRun) -> CrawlResult<String> {
        let run_id = Uuid::new_v4().to_string();
        debug!("Storing run {} for template {} ({} rows)", run_id, template_id, run.total_count);

        self.runs.insert(
            run_id.clone(),
            StoredRun {
                run_id: run_id.clone(),
                template_id: template_id.to_string(),
                saved_at: Utc::now(),
                run: run.clone(),
            },
        );
        Ok(run_id)
    }
}
