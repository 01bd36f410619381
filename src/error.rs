use crate::models::{RunSummary, ScrapeAttempt};
use thiserror::Error;

/// Terminal failure of a fetch after every attempt was used up.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("GET {url} failed after {attempts} attempt(s): {message}")]
pub struct FetchError {
    pub url: String,
    pub attempts: u32,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Unreachable, timed out or non-2xx. Never fatal to a sweep.
    #[error(transparent)]
    Network(#[from] FetchError),

    /// Malformed registry entry. Only raised before any resort is processed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A write to the report store or attempt log failed.
    #[error("persistence error for {resort}")]
    Persistence {
        resort: String,
        #[source]
        source: anyhow::Error,
    },
}

/// What a sweep had gathered when it stopped.
#[derive(Debug, Clone, Default)]
pub struct Sweep {
    pub summary: RunSummary,
    pub attempts: Vec<ScrapeAttempt>,
}

/// A sweep aborted by a run-level failure. The attempts gathered up to that
/// point travel with the error.
#[derive(Debug, Error)]
#[error("sweep aborted after {} resort(s): {cause}", .sweep.summary.attempted)]
pub struct SweepError {
    pub sweep: Sweep,
    #[source]
    pub cause: EngineError,
}
