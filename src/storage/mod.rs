use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

pub mod migrations;

use crate::config::StorageConfig;
use crate::core::{ResultsStore, StoredRun, TemplateStore};
use crate::error::{CrawlError, CrawlResult};
use crate::extract::{ExtractedRow, ExtractionRun};
use crate::fetcher::RenderMode;
use crate::template::ExtractionTemplate;

/// Summary line for a persisted run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub template_id: String,
    pub render_mode: RenderMode,
    pub total_count: usize,
    pub pages_fetched: usize,
    pub saved_at: DateTime<Utc>,
}

/// SQLite-backed template and results store
#[derive(Clone)]
pub struct SqliteStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub async fn from_config(config: &StorageConfig) -> CrawlResult<Self> {
        Self::open(&config.path).await
    }

    /// Open (or create) the database at `path` and migrate it
    pub async fn open(path: &Path) -> CrawlResult<Self> {
        info!("Opening crawler store at {}", path.display());

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CrawlError::storage(format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let connection = Connection::open(path)?;
        connection.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::run_migrations(&connection).map_err(|e| CrawlError::storage(format!("migration failed: {}", e)))?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Insert or replace a template; its id is required
    pub async fn put_template(&self, template: &ExtractionTemplate) -> CrawlResult<()> {
        let id = template
            .id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| CrawlError::invalid_template("Template id is required"))?;
        let definition = serde_json::to_string(template).map_err(|e| CrawlError::storage(e.to_string()))?;

        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT INTO templates (id, name, definition_json, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name,
                 definition_json = excluded.definition_json, updated_at = excluded.updated_at",
            params![id, template.name, definition, Utc::now().timestamp()],
        )?;

        debug!("Stored template {}", id);
        Ok(())
    }

    pub async fn list_templates(&self) -> CrawlResult<Vec<ExtractionTemplate>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare("SELECT definition_json FROM templates ORDER BY id")?;
        let definitions = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        definitions.iter().map(|json| decode(json)).collect()
    }

    /// Returns false when no such template existed
    pub async fn delete_template(&self, id: &str) -> CrawlResult<bool> {
        let conn = self.connection.lock().await;
        let deleted = conn.execute("DELETE FROM templates WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// Runs of one template, newest first
    pub async fn list_runs(&self, template_id: &str) -> CrawlResult<Vec<RunRecord>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, template_id, render_mode, total_count, pages_fetched, saved_at
             FROM runs WHERE template_id = ?1 ORDER BY saved_at DESC, rowid DESC",
        )?;

        let records = stmt
            .query_map(params![template_id], |row| {
                Ok(RunRecord {
                    run_id: row.get(0)?,
                    template_id: row.get(1)?,
                    render_mode: parse_render_mode(&row.get::<_, String>(2)?),
                    total_count: row.get::<_, i64>(3)? as usize,
                    pages_fetched: row.get::<_, i64>(4)? as usize,
                    saved_at: DateTime::from_timestamp(row.get(5)?, 0).unwrap_or_else(Utc::now),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Reassemble a stored run with its rows in order
    pub async fn load_run(&self, run_id: &str) -> CrawlResult<StoredRun> {
        let conn = self.connection.lock().await;

        let header = conn
            .query_row(
                "SELECT template_id, render_mode, total_count, pages_fetched, container_matches,
                        warnings_json, errors_json, duration_ms, saved_at, render_decision_json
                 FROM runs WHERE id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, i64>(7)?,
                        row.get::<_, i64>(8)?,
                        row.get::<_, Option<String>>(9)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| CrawlError::storage(format!("run not found: {}", run_id)))?;

        let (template_id, mode, total, pages, matches, warnings, errors, duration, saved_at, decision) = header;

        let mut stmt = conn.prepare(
            "SELECT row_idx, page_number, source_url, data_json FROM run_rows
             WHERE run_id = ?1 ORDER BY row_idx",
        )?;
        let raw_rows = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let rows = raw_rows
            .into_iter()
            .map(|(row_index, page_number, source_url, data)| {
                Ok(ExtractedRow {
                    row_index: row_index as usize,
                    page_number: page_number as usize,
                    source_url,
                    values: decode::<BTreeMap<String, String>>(&data)?,
                })
            })
            .collect::<CrawlResult<Vec<_>>>()?;

        let run = ExtractionRun {
            empty_result: rows.is_empty(),
            rows,
            total_count: total as usize,
            pages_fetched: pages as usize,
            render_mode: parse_render_mode(&mode),
            container_matches: matches as usize,
            render_decision: decision.as_deref().map(decode).transpose()?,
            warnings: decode(&warnings)?,
            errors: decode(&errors)?,
            duration_ms: duration as u64,
        };

        Ok(StoredRun {
            run_id: run_id.to_string(),
            template_id,
            saved_at: DateTime::from_timestamp(saved_at, 0).unwrap_or_else(Utc::now),
            run,
        })
    }

    /// Rows of a run that are not exact duplicates of an earlier row
    pub async fn distinct_row_count(&self, run_id: &str) -> CrawlResult<usize> {
        let conn = self.connection.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT hash) FROM run_rows WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[async_trait]
impl TemplateStore for SqliteStore {
    async fn get_template(&self, id: &str) -> CrawlResult<ExtractionTemplate> {
        let conn = self.connection.lock().await;
        let definition: Option<String> = conn
            .query_row(
                "SELECT definition_json FROM templates WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let definition = definition.ok_or_else(|| CrawlError::TemplateNotFound { id: id.to_string() })?;
        let mut template: ExtractionTemplate = decode(&definition)?;
        template.id.get_or_insert_with(|| id.to_string());
        Ok(template)
    }
}

#[async_trait]
impl ResultsStore for SqliteStore {
    async fn save_run(&self, template_id: &str, run: &ExtractionRun) -> CrawlResult<String> {
        let run_id = Uuid::new_v4().to_string();
        let warnings = encode(&run.warnings)?;
        let errors = encode(&run.errors)?;
        let decision = run.render_decision.as_ref().map(encode).transpose()?;

        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO runs (id, template_id, render_mode, total_count, pages_fetched, container_matches,
                               warnings_json, errors_json, duration_ms, saved_at, render_decision_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                run_id,
                template_id,
                run.render_mode.to_string(),
                run.total_count as i64,
                run.pages_fetched as i64,
                run.container_matches as i64,
                warnings,
                errors,
                run.duration_ms as i64,
                Utc::now().timestamp(),
                decision,
            ],
        )?;

        {
            let mut insert = tx.prepare(
                "INSERT INTO run_rows (run_id, row_idx, page_number, source_url, data_json, hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in &run.rows {
                let data = encode(&row.values)?;
                insert.execute(params![
                    run_id,
                    row.row_index as i64,
                    row.page_number as i64,
                    row.source_url,
                    data,
                    row_hash(&row.values),
                ])?;
            }
        }
        tx.commit()?;

        info!("Saved run {} for template {} ({} rows)", run_id, template_id, run.rows.len());
        Ok(run_id)
    }
}

/// Content fingerprint of a row's values
pub fn row_hash(values: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (name, value) in values {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0xffu8]);
    }
    hex::encode(hasher.finalize())
}

fn parse_render_mode(raw: &str) -> RenderMode {
    match raw {
        "dynamic" => RenderMode::Dynamic,
        _ => RenderMode::Static,
    }
}

fn encode<T: Serialize>(value: &T) -> CrawlResult<String> {
    serde_json::to_string(value).map_err(|e| CrawlError::storage(format!("encode failed: {}", e)))
}

fn decode<T: for<'de> Deserialize<'de>>(json: &str) -> CrawlResult<T> {
    serde_json::from_str(json).map_err(|e| CrawlError::storage(format!("corrupt stored value: {}", e)))
}
