//! API-facing request/response models and the mapping from engine answers to
//! HTTP status codes.

use std::time::Duration;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{JobId, JobOutcome, JobSpec, JobStatus, Priority, RejectReason, Rejection};

/// `POST /jobs` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Opaque payload forwarded to the dependency.
    pub payload: Value,
    /// Optional priority.
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Optional deadline in milliseconds from submission.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    /// Overrides the configured admission mode for this request.
    #[serde(default)]
    pub wait: Option<bool>,
}

impl SubmitRequest {
    /// The job spec this request describes.
    #[must_use]
    pub fn to_spec(&self) -> JobSpec {
        JobSpec {
            payload: self.payload.clone(),
            priority: self.priority,
            deadline: self.deadline_ms.map(Duration::from_millis),
        }
    }
}

/// `202` body: the job is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueAck {
    /// Job identifier.
    pub id: JobId,
    /// Always `"accepted"`.
    pub status: String,
    /// Queue depth after insertion.
    pub queue_depth: usize,
    /// Queue capacity.
    pub queue_capacity: usize,
}

impl EnqueueAck {
    /// Acknowledge `id`.
    #[must_use]
    pub fn new(id: JobId, queue_depth: usize, queue_capacity: usize) -> Self {
        Self {
            id,
            status: "accepted".to_string(),
            queue_depth,
            queue_capacity,
        }
    }
}

/// Job status (lookup) or outcome (wait mode).
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusResponse {
    /// Job identifier.
    pub id: JobId,
    /// Status, flattened so `status` sits beside `id`.
    #[serde(flatten)]
    pub status: JobStatus,
}

impl JobStatusResponse {
    /// Wrap a terminal outcome.
    #[must_use]
    pub const fn finished(id: JobId, outcome: JobOutcome) -> Self {
        Self {
            id,
            status: JobStatus::Finished(outcome),
        }
    }
}

/// Error body for rejections and lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub error: String,
    /// Suggested wait in whole seconds, when retrying makes sense.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ErrorBody {
    /// Body for an admission rejection.
    #[must_use]
    pub fn rejected(rejection: &Rejection) -> Self {
        Self {
            error: rejection.reason.as_str().to_string(),
            retry_after_secs: retry_after_header(rejection),
        }
    }

    /// Body with only an error code.
    #[must_use]
    pub fn plain(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            retry_after_secs: None,
        }
    }
}

/// `GET /health` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Always `"ok"` while the process serves requests.
    pub status: String,
    /// Seconds since the engine started.
    pub uptime_secs: u64,
    /// Jobs waiting.
    pub queue_depth: usize,
    /// Queue capacity.
    pub queue_capacity: usize,
}

/// `GET /ready` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    /// `accepting && dependency`.
    pub ready: bool,
    /// Shutdown has not begun.
    pub accepting: bool,
    /// The downstream answered its health check in time.
    pub dependency: bool,
}

impl Readiness {
    /// Combine the two conditions.
    #[must_use]
    pub const fn new(accepting: bool, dependency: bool) -> Self {
        Self {
            ready: accepting && dependency,
            accepting,
            dependency,
        }
    }
}

/// `429` for capacity rejections, `503` for breaker and shutdown.
#[must_use]
pub const fn rejection_status(reason: RejectReason) -> StatusCode {
    match reason {
        RejectReason::QueueFull | RejectReason::Overloaded => StatusCode::TOO_MANY_REQUESTS,
        RejectReason::BreakerOpen | RejectReason::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// `Retry-After` seconds, or `None` when retrying this instance is pointless
/// (it is shutting down).
#[must_use]
pub fn retry_after_header(rejection: &Rejection) -> Option<u64> {
    match rejection.reason {
        RejectReason::ShuttingDown => None,
        _ => Some(rejection.retry_after_secs()),
    }
}
