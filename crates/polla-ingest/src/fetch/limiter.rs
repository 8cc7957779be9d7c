//! Per-host request pacing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Gate awaited immediately before every outgoing request.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait until a request to `host` is permitted.
    async fn acquire(&self, host: &str);
}

/// Limiter that never waits.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn acquire(&self, _host: &str) {}
}

/// Enforces a minimum interval between requests to the same host.
pub struct HostRateLimiter {
    min_interval: Duration,
    /// Next instant at which each host may be contacted.
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl HostRateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter allowing at most `rps` requests per second per host.
    ///
    /// `rps` must be positive and finite; configuration validation guarantees it.
    pub fn per_second(rps: f64) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / rps))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[async_trait]
impl RateLimiter for HostRateLimiter {
    async fn acquire(&self, host: &str) {
        // Reserve the slot under the lock, sleep outside it.
        let wait = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots
                .get(host)
                .copied()
                .filter(|s| *s > now)
                .unwrap_or(now);
            slots.insert(host.to_string(), slot + self.min_interval);
            slot - now
        };
        if !wait.is_zero() {
            tracing::debug!("rate limiter: waiting {}ms for {host}", wait.as_millis());
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_limiter_returns_immediately() {
        let start = Instant::now();
        NoopRateLimiter.acquire("example.com").await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_host_limiter_spaces_same_host() {
        let limiter = HostRateLimiter::new(Duration::from_millis(60));
        let start = Instant::now();
        limiter.acquire("a.test").await;
        limiter.acquire("a.test").await;
        limiter.acquire("a.test").await;
        assert!(start.elapsed() >= Duration::from_millis(115));
    }

    #[tokio::test]
    async fn test_host_limiter_independent_hosts() {
        let limiter = HostRateLimiter::new(Duration::from_millis(500));
        let start = Instant::now();
        limiter.acquire("a.test").await;
        limiter.acquire("b.test").await;
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn test_per_second_interval() {
        let limiter = HostRateLimiter::per_second(4.0);
        assert_eq!(limiter.min_interval(), Duration::from_millis(250));
    }
}
