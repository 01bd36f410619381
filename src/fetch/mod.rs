pub mod http_client;
pub mod rate_limit;

use crate::error::FetchError;
use async_trait::async_trait;
use tracing::debug;

pub use self::http_client::{FetchPolicy, HttpFetcher};

/// Retrieved page content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// URL that was requested.
    pub url: String,
    pub status: u16,
    pub body: String,
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable page retrieval, so the collector can run against canned content.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Page, FetchError>;

    /// Try candidates in order and stop at the first one that yields content,
    /// whether or not that content later parses. Returns the last failure
    /// when none succeed.
    async fn fetch_first(&self, urls: &[String]) -> Result<Page, FetchError> {
        let mut last_err = FetchError {
            url: String::new(),
            attempts: 0,
            message: "no candidate URLs".to_string(),
        };

        for url in urls {
            match self.fetch(url).await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    debug!("Candidate {} failed, trying next: {}", url, e);
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }
}
