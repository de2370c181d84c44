use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{MatchOutcome, MatchRequest, StructuralParser};
use crate::config::ParserConfig;
use crate::error::{CrawlError, CrawlResult};

/// Structural parser running as an external program speaking JSON over stdio
///
/// The program reads one request object from stdin and prints one response
/// object on stdout:
///
/// ```text
/// -> {"html": "...", "selectors": {"container": "li", "fields": {"title": "a"}}, "base_url": "..."}
/// <- {"success": true, "data": [{"title": "..."}], "error": null}
/// ```
pub struct SubprocessParser {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

#[derive(Serialize)]
struct ParserPayload<'a> {
    html: &'a str,
    selectors: PayloadSelectors<'a>,
    base_url: Option<&'a str>,
}

#[derive(Serialize)]
struct PayloadSelectors<'a> {
    container: &'a str,
    fields: BTreeMap<&'a str, String>,
}

#[derive(Deserialize)]
struct ParserResponse {
    success: bool,
    #[serde(default)]
    data: Option<Vec<serde_json::Map<String, Value>>>,
    #[serde(default)]
    count: Option<usize>,
    #[serde(default)]
    error: Option<String>,
}

impl SubprocessParser {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &ParserConfig) -> CrawlResult<Self> {
        let program = config
            .program
            .clone()
            .ok_or_else(|| CrawlError::config("parser.program is required for the subprocess backend"))?;
        Ok(Self::new(program, config.args.clone(), Duration::from_millis(config.timeout_ms)))
    }

    fn payload(request: &MatchRequest) -> CrawlResult<Vec<u8>> {
        let payload = ParserPayload {
            html: &request.html,
            selectors: PayloadSelectors {
                container: &request.container_selector,
                fields: request
                    .fields
                    .iter()
                    .map(|(name, selector)| (name.as_str(), selector.to_wire()))
                    .collect(),
            },
            base_url: request.base_url.as_deref(),
        };
        serde_json::to_vec(&payload).map_err(|e| CrawlError::internal(format!("Failed to encode parser payload: {}", e)))
    }

    async fn run(&self, input: Vec<u8>) -> CrawlResult<std::process::Output> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CrawlError::parser_crashed(format!("failed to start {}: {}", self.program.display(), e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // Written concurrently so a child that never reads cannot stall us
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    debug!("Parser stdin closed early: {}", e);
                }
            });
        }

        // Dropping the wait future on timeout kills the child
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| CrawlError::parser_crashed(e.to_string())),
            Err(_) => {
                warn!("Structural parser exceeded {}ms, killed", self.timeout.as_millis());
                Err(CrawlError::ParserTimeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[async_trait]
impl StructuralParser for SubprocessParser {
    async fn match_rows(&self, request: &MatchRequest) -> CrawlResult<MatchOutcome> {
        let output = self.run(Self::payload(request)?).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.trim().chars().rev().take(500).collect::<Vec<_>>().into_iter().rev().collect();
            return Err(CrawlError::parser_crashed(format!("exit status {}: {}", output.status, tail)));
        }

        let response = parse_response(&output.stdout)?;
        if !response.success {
            return Err(CrawlError::parser_crashed(
                response.error.unwrap_or_else(|| "parser reported failure".to_string()),
            ));
        }

        let data = response.data.unwrap_or_default();
        let rows: Vec<BTreeMap<String, String>> = data
            .into_iter()
            .map(|row| row.into_iter().map(|(k, v)| (k, value_to_string(v))).collect())
            .collect();

        Ok(MatchOutcome {
            container_matches: response.count.unwrap_or(rows.len()),
            rows,
        })
    }

    fn name(&self) -> &'static str {
        "subprocess"
    }
}

/// Whole stdout as JSON, falling back to the last non-empty line
fn parse_response(stdout: &[u8]) -> CrawlResult<ParserResponse> {
    let text = String::from_utf8_lossy(stdout);
    serde_json::from_str::<ParserResponse>(text.trim()).or_else(|first_error| {
        text.lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .and_then(|line| serde_json::from_str::<ParserResponse>(line.trim()).ok())
            .ok_or_else(|| CrawlError::malformed_output(first_error.to_string()))
    })
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
