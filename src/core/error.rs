//! Error types for engine operations.

use thiserror::Error;

use super::job::JobId;
use crate::config::ConfigError;

/// Errors produced by engine components.
///
/// Per-job results are not errors; they are reported as
/// [`JobOutcome`](super::outcome::JobOutcome) values.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    /// The Prometheus exporter could not be set up.
    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    /// No status is held for the job (never submitted or already evicted).
    #[error("job {0} not found")]
    JobNotFound(JobId),
    /// Backend construction failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
