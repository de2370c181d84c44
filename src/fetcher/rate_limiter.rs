use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Per-domain politeness delay between consecutive page fetches
#[derive(Clone)]
pub struct RateLimiter {
    domain_limits: Arc<RwLock<HashMap<String, DomainLimiter>>>,
    default_delay: Duration,
}

/// Per-domain rate limiting state
struct DomainLimiter {
    next_slot: Instant,
    request_count: usize,
    delay: Duration,
}

impl RateLimiter {
    pub fn new(default_delay: Duration) -> Self {
        Self {
            domain_limits: Arc::new(RwLock::new(HashMap::new())),
            default_delay,
        }
    }

    /// Time the caller must still wait before hitting `domain`, reserving the slot
    async fn reserve(&self, domain: &str) -> Duration {
        let now = Instant::now();
        let mut limits = self.domain_limits.write().await;
        let limiter = limits.entry(domain.to_string()).or_insert_with(|| DomainLimiter {
            next_slot: now,
            request_count: 0,
            delay: self.default_delay,
        });

        let start = limiter.next_slot.max(now);
        limiter.next_slot = start + limiter.delay;
        limiter.request_count += 1;

        start.saturating_duration_since(now)
    }

    /// Wait for rate limit before making request to domain
    pub async fn wait_for_domain(&self, domain: &str) {
        let required_delay = self.reserve(domain).await;

        if !required_delay.is_zero() {
            debug!("Rate limiting: waiting {}ms for domain {}", required_delay.as_millis(), domain);
            tokio::time::sleep(required_delay).await;
        }
    }

    /// Like `wait_for_domain`, but gives up once `deadline` would be exceeded
    ///
    /// Returns `false` when the wait would outlast the deadline.
    pub async fn wait_until(&self, domain: &str, deadline: Instant) -> bool {
        let required_delay = self.reserve(domain).await;
        if Instant::now() + required_delay > deadline {
            return false;
        }
        if !required_delay.is_zero() {
            debug!("Rate limiting: waiting {}ms for domain {}", required_delay.as_millis(), domain);
            tokio::time::sleep(required_delay).await;
        }
        true
    }

    /// Set custom delay for a domain
    pub async fn set_domain_delay(&self, domain: &str, delay: Duration) {
        let mut limits = self.domain_limits.write().await;
        let limiter = limits.entry(domain.to_string()).or_insert_with(|| DomainLimiter {
            next_slot: Instant::now(),
            request_count: 0,
            delay,
        });
        limiter.delay = delay;
    }

    pub async fn get_domain_request_count(&self, domain: &str) -> usize {
        let limits = self.domain_limits.read().await;
        limits.get(domain).map(|l| l.request_count).unwrap_or(0)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}
