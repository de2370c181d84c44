use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};
use url::Url;

use super::browser::{NavigateOptions, RenderSession, RenderedPage, SessionLauncher};
use crate::error::{CrawlError, CrawlResult};
use crate::logging::LogContext;

/// Slack granted to a backend beyond the navigation timeout before the pool
/// force-closes the session itself
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Bounded pool of headless render sessions
///
/// At most `max_sessions` sessions exist at once. Healthy sessions are
/// reused; sessions that crashed or timed out are closed and dropped.
pub struct RenderPool {
    launcher: Arc<dyn SessionLauncher>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn RenderSession>>>,
    max_sessions: usize,
    launched: AtomicUsize,
    reused: AtomicUsize,
    discarded: AtomicUsize,
}

/// Pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub max_sessions: usize,
    pub idle: usize,
    pub in_use: usize,
    pub launched: usize,
    pub reused: usize,
    pub discarded: usize,
}

impl RenderPool {
    pub fn new(launcher: Arc<dyn SessionLauncher>, max_sessions: usize) -> Self {
        let max_sessions = max_sessions.max(1);
        info!("Render pool created with {} session(s)", max_sessions);

        Self {
            launcher,
            permits: Arc::new(Semaphore::new(max_sessions)),
            idle: Mutex::new(Vec::new()),
            max_sessions,
            launched: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
        }
    }

    /// Render `url` on a pooled session
    pub async fn render(&self, url: &Url, options: &NavigateOptions) -> CrawlResult<RenderedPage> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CrawlError::RenderUnavailable { reason: "render pool is shut down".to_string() })?;

        let session = self.checkout().await?;

        let hard_limit = options.timeout + FORCE_CLOSE_GRACE;
        let result = match tokio::time::timeout(hard_limit, session.navigate(url, options)).await {
            Ok(result) => result,
            Err(_) => Err(CrawlError::RenderTimeout {
                url: url.to_string(),
                timeout_ms: options.timeout.as_millis() as u64,
            }),
        };

        match &result {
            Err(e) if e.is_timeout() || !session.is_healthy() => {
                warn!("Discarding render session after failure on {}: {}", url, e);
                self.discard(session).await;
            }
            _ if !session.is_healthy() => self.discard(session).await,
            _ => self.idle.lock().await.push(session),
        }

        result
    }

    async fn checkout(&self) -> CrawlResult<Box<dyn RenderSession>> {
        loop {
            let candidate = self.idle.lock().await.pop();
            match candidate {
                Some(session) if session.is_healthy() => {
                    self.reused.fetch_add(1, Ordering::SeqCst);
                    return Ok(session);
                }
                Some(session) => self.discard(session).await,
                None => break,
            }
        }

        debug!("Launching new render session");
        let session = self.launcher.launch().await.map_err(|e| {
            let context = LogContext::new("render_pool", "launch").with_error_category(e.category());
            crate::log_error!(context, e, "Failed to launch render session");
            e
        })?;
        self.launched.fetch_add(1, Ordering::SeqCst);
        Ok(session)
    }

    async fn discard(&self, session: Box<dyn RenderSession>) {
        session.close().await;
        self.discarded.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn stats(&self) -> PoolStats {
        PoolStats {
            max_sessions: self.max_sessions,
            idle: self.idle.lock().await.len(),
            in_use: self.max_sessions - self.permits.available_permits(),
            launched: self.launched.load(Ordering::SeqCst),
            reused: self.reused.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
        }
    }

    /// Close idle sessions and refuse further renders
    pub async fn shutdown(&self) {
        self.permits.close();
        let sessions: Vec<_> = self.idle.lock().await.drain(..).collect();
        let closed = sessions.len();
        futures::future::join_all(sessions.iter().map(|session| session.close())).await;
        info!("Render pool shut down ({} idle session(s) closed)", closed);
    }
}
