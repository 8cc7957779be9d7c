//! Polite HTTP retrieval of source pages.
//!
//! Every request is preceded by the injected [`RateLimiter`] and, once per
//! host, by a robots.txt check. HTTP 429 gets exactly one retry after a
//! fixed backoff; any other non-2xx is reported as-is for the caller to
//! classify.

pub mod limiter;
pub mod robots;

use async_trait::async_trait;
use reqwest::header::{ACCEPT_LANGUAGE, USER_AGENT};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::error::FetchError;
use crate::model::RawFetch;

pub use limiter::{HostRateLimiter, NoopRateLimiter, RateLimiter};
pub use robots::RobotsRules;

const ACCEPT_LANGUAGE_VALUE: &str = "es-CL,es;q=0.9";

/// Anything that can turn a URL into a [`RawFetch`].
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<RawFetch, FetchError>;
}

/// reqwest-backed fetcher with robots caching and 429 handling.
pub struct HttpFetcher {
    client: reqwest::Client,
    limiter: Arc<dyn RateLimiter>,
    /// Robots rules per origin, fetched at most once.
    robots: Mutex<HashMap<String, RobotsRules>>,
    rate_limit_backoff: Duration,
}

impl HttpFetcher {
    pub fn new(
        limiter: Arc<dyn RateLimiter>,
        rate_limit_backoff: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            limiter,
            robots: Mutex::new(HashMap::new()),
            rate_limit_backoff,
        })
    }

    /// Check robots.txt for `url`, fetching and caching it on first use.
    async fn check_robots(
        &self,
        url: &url::Url,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<(), FetchError> {
        let origin = url.origin().ascii_serialization();
        let host = url.host_str().unwrap_or_default().to_string();

        let mut cache = self.robots.lock().await;
        if !cache.contains_key(&origin) {
            let rules = self
                .load_robots(&origin, &host, user_agent, timeout)
                .await;
            cache.insert(origin.clone(), rules);
        }

        let allowed = cache
            .get(&origin)
            .map(|rules| {
                let mut path = url.path().to_string();
                if let Some(q) = url.query() {
                    path.push('?');
                    path.push_str(q);
                }
                rules.is_allowed(robots::agent_token(user_agent), &path)
            })
            .unwrap_or(true);

        if allowed {
            Ok(())
        } else {
            tracing::warn!("robots.txt disallows {url}");
            Err(FetchError::Blocked(url.to_string()))
        }
    }

    async fn load_robots(
        &self,
        origin: &str,
        host: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> RobotsRules {
        let robots_url = format!("{origin}/robots.txt");
        self.limiter.acquire(host).await;

        let resp = self
            .client
            .get(&robots_url)
            .header(USER_AGENT, user_agent)
            .timeout(timeout)
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => match r.text().await {
                Ok(body) => RobotsRules::parse(&body),
                Err(e) => {
                    tracing::warn!("could not read {robots_url}: {e}");
                    RobotsRules::allow_all()
                }
            },
            Ok(r) if matches!(r.status().as_u16(), 401 | 403) || r.status().is_server_error() => {
                tracing::warn!("{robots_url} returned {}; refusing all", r.status());
                RobotsRules::deny_all()
            }
            Ok(r) => {
                tracing::debug!("{robots_url} returned {}; allowing all", r.status());
                RobotsRules::allow_all()
            }
            Err(e) => {
                tracing::warn!("could not fetch {robots_url}: {e}");
                RobotsRules::allow_all()
            }
        }
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<RawFetch, FetchError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| FetchError::Transport(format!("invalid URL {url}: {e}")))?;
        let host = parsed.host_str().unwrap_or_default().to_string();

        self.check_robots(&parsed, user_agent, timeout).await?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.limiter.acquire(&host).await;

            let span = tracing::info_span!(
                "fetch_attempt",
                url,
                attempt,
                status = tracing::field::Empty,
                elapsed_ms = tracing::field::Empty,
            );
            let started = Instant::now();

            let resp = self
                .client
                .get(url)
                .header(USER_AGENT, user_agent)
                .header(ACCEPT_LANGUAGE, ACCEPT_LANGUAGE_VALUE)
                .timeout(timeout)
                .send()
                .instrument(span.clone())
                .await;

            let resp = match resp {
                Ok(r) => r,
                Err(e) => {
                    span.record("elapsed_ms", started.elapsed().as_millis() as u64);
                    return Err(classify(e, url));
                }
            };

            let status = resp.status().as_u16();
            span.record("status", status);

            if status == 429 {
                span.record("elapsed_ms", started.elapsed().as_millis() as u64);
                if attempt == 1 {
                    tracing::warn!(
                        "429 from {url}; sleeping {}s before retry",
                        self.rate_limit_backoff.as_secs_f64()
                    );
                    tokio::time::sleep(self.rate_limit_backoff).await;
                    continue;
                }
                return Err(FetchError::RateLimited(url.to_string()));
            }

            if !resp.status().is_success() {
                span.record("elapsed_ms", started.elapsed().as_millis() as u64);
                return Err(FetchError::HttpError(status));
            }

            let final_url = resp.url().to_string();
            let body = resp
                .text()
                .instrument(span.clone())
                .await
                .map_err(|e| classify(e, url))?;
            span.record("elapsed_ms", started.elapsed().as_millis() as u64);

            span.in_scope(|| {
                tracing::debug!("fetched {} bytes from {final_url}", body.len());
            });
            return Ok(RawFetch::new(url, &final_url, user_agent, body));
        }
    }
}

fn classify(err: reqwest::Error, url: &str) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(url.to_string())
    } else if let Some(status) = err.status() {
        FetchError::HttpError(status.as_u16())
    } else {
        FetchError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_fetcher_creation() {
        let fetcher = HttpFetcher::new(Arc::new(NoopRateLimiter), Duration::from_millis(10));
        assert!(fetcher.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_url_is_transport_error() {
        let fetcher =
            HttpFetcher::new(Arc::new(NoopRateLimiter), Duration::from_millis(10)).unwrap();
        let err = fetcher
            .fetch("not a url", "polla-ingest/0.1", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }
}
