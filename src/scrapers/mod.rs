//! Fetching list pages and entity details from the two sources.
//!
//! The scheduler treats both operations as opaque and retryable; it only
//! sees records, a JSON payload, or a `ScrapeError`.

mod config;
mod http_client;
mod http_scraper;
mod parser;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{DetailScope, EntityRecord, EntityRef, ListTarget, Source};
use crate::rate_limit::{Backoffable, RetryHint};

pub use config::{render_template, HtmlDetailRules, HtmlListRules, JsonListRules, ScraperConfig};
pub use http_client::{ActiveRequestGuard, ActiveRequests, HttpClient, USER_AGENT};
pub use http_scraper::HttpScraper;
pub use parser::{extract_path, resolve_url, HtmlDetailParser, HtmlListParser, JsonListParser};

pub type ScrapeResult<T> = Result<T, ScrapeError>;

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("{site} rate limited (retry after {retry_after:?})")]
    RateLimited {
        site: Source,
        retry_after: Option<Duration>,
    },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid scraper configuration: {0}")]
    Config(String),
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ScrapeError>,
    },
}

impl Backoffable for ScrapeError {
    fn retry_hint(&self) -> RetryHint {
        match self {
            Self::RateLimited { retry_after, .. } => RetryHint::RateLimited(*retry_after),
            Self::Network(_) | Self::Timeout(_) => RetryHint::Transient,
            Self::Status { status, .. } if *status >= 500 => RetryHint::Transient,
            _ => RetryHint::Fatal,
        }
    }

    fn exhausted(self, attempts: u32) -> Self {
        Self::RetriesExhausted {
            attempts,
            last: Box::new(self),
        }
    }
}

/// Source access used by the task handlers.
#[async_trait]
pub trait SourceScraper: Send + Sync {
    /// Entities listed on one page/region/event list.
    async fn scrape_list(&self, target: &ListTarget) -> ScrapeResult<Vec<EntityRecord>>;

    /// Detail payload for one entity.
    async fn scrape_detail(&self, entity: &EntityRef, scope: DetailScope) -> ScrapeResult<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_hints() {
        let limited = ScrapeError::RateLimited {
            site: Source::Stats,
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(
            limited.retry_hint(),
            RetryHint::RateLimited(Some(Duration::from_secs(3)))
        );
        assert_eq!(
            ScrapeError::Status { status: 502, url: "u".into() }.retry_hint(),
            RetryHint::Transient
        );
        assert_eq!(
            ScrapeError::Status { status: 404, url: "u".into() }.retry_hint(),
            RetryHint::Fatal
        );
        assert_eq!(ScrapeError::Parse("x".into()).retry_hint(), RetryHint::Fatal);
    }

    #[test]
    fn test_exhausted_wraps_last_error() {
        let err = ScrapeError::Timeout("u".into()).exhausted(5);
        assert!(matches!(err, ScrapeError::RetriesExhausted { attempts: 5, .. }));
        assert!(err.to_string().contains("timed out"));
    }
}
