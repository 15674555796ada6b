//! HTTP client applying source rate limits and backoff to every request.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use super::{ScrapeError, ScrapeResult};
use crate::models::{OpClass, Source};
use crate::rate_limit::{parse_retry_after, BackoffController, RateLimiter};

pub const USER_AGENT: &str = concat!("rosterwatch/", env!("CARGO_PKG_VERSION"));

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Resolve user agent from config value.
/// - None => default agent
/// - "impersonate" => real browser agent
/// - other => custom agent string
pub fn resolve_user_agent(config: Option<&str>) -> String {
    match config {
        None => USER_AGENT.to_string(),
        Some("impersonate") => BROWSER_USER_AGENT.to_string(),
        Some(custom) => custom.to_string(),
    }
}

/// Count of requests currently on the wire, across every handler and worker.
#[derive(Debug, Clone, Default)]
pub struct ActiveRequests(Arc<AtomicUsize>);

impl ActiveRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Count one request until the guard drops.
    pub fn track(&self) -> ActiveRequestGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        ActiveRequestGuard(self.0.clone())
    }
}

pub struct ActiveRequestGuard(Arc<AtomicUsize>);

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    limiter: RateLimiter,
    backoff: BackoffController,
    active: ActiveRequests,
}

impl HttpClient {
    pub fn new(
        timeout: Duration,
        user_agent: Option<&str>,
        limiter: RateLimiter,
        backoff: BackoffController,
        active: ActiveRequests,
    ) -> ScrapeResult<Self> {
        let client = Client::builder()
            .user_agent(resolve_user_agent(user_agent))
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| ScrapeError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            limiter,
            backoff,
            active,
        })
    }

    pub fn active_requests(&self) -> &ActiveRequests {
        &self.active
    }

    /// GET a body as text, retrying through the backoff controller.
    pub async fn get_text(&self, source: Source, op: OpClass, url: &str) -> ScrapeResult<String> {
        let label = format!("GET {}", url);
        self.backoff
            .run(&label, || self.fetch_once(source, op, url))
            .await
    }

    pub async fn get_json(&self, source: Source, op: OpClass, url: &str) -> ScrapeResult<Value> {
        let body = self.get_text(source, op, url).await?;
        serde_json::from_str(&body)
            .map_err(|e| ScrapeError::Parse(format!("invalid JSON from {}: {}", url, e)))
    }

    async fn fetch_once(&self, source: Source, op: OpClass, url: &str) -> ScrapeResult<String> {
        self.limiter.wait(source, op).await;
        let _in_flight = self.active.track();

        debug!("GET {} ({} {})", url, source, op.as_str());
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ScrapeError::Timeout(url.to_string())
            } else {
                ScrapeError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(
                response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok()),
            );
            return Err(ScrapeError::RateLimited {
                site: source,
                retry_after,
            });
        }
        if !status.is_success() {
            return Err(ScrapeError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                ScrapeError::Timeout(url.to_string())
            } else {
                ScrapeError::Network(e.to_string())
            }
        })
    }
}
