//! Terminal outcomes and the status a job moves through.
//!
//! Every admitted job ends in exactly one [`JobOutcome`]. Submissions turned
//! away at admission never become jobs; they get a [`Rejection`] instead.

use std::time::Duration;

use serde::{Serialize, Serializer};
use serde_json::Value;

/// Why admission (or the breaker gate) turned work away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The queue is at capacity.
    QueueFull,
    /// The global in-flight ceiling is reached.
    Overloaded,
    /// The circuit breaker is open.
    BreakerOpen,
    /// The engine is draining and takes no new work.
    ShuttingDown,
}

impl RejectReason {
    /// Stable label used in metrics and responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::Overloaded => "overloaded",
            Self::BreakerOpen => "breaker_open",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

/// A rejection with a hint for when to try again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    /// Machine-readable reason.
    pub reason: RejectReason,
    /// Suggested wait before retrying.
    pub retry_after: Duration,
}

impl Rejection {
    /// Retry-after rounded up to whole seconds, never below one.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs() + u64::from(self.retry_after.subsec_nanos() > 0);
        secs.max(1)
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// A waiting caller's request timeout elapsed first. The job itself may
    /// still complete later.
    Timeout,
    /// The job's deadline passed before an attempt could start.
    DeadlineExceeded,
    /// Every attempt failed with a retryable error.
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: String,
    },
    /// The dependency refused the input; retrying cannot help.
    NonRetryable {
        /// Error detail.
        message: String,
    },
    /// The job's execution panicked inside the worker.
    Crashed {
        /// Panic detail.
        message: String,
    },
}

impl FailureReason {
    /// Stable label used in metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::NonRetryable { .. } => "non_retryable",
            Self::Crashed { .. } => "crashed",
        }
    }
}

/// Why a job was given up without running to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    /// The pool shut down before the job finished.
    Shutdown,
}

/// Terminal result of an admitted job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The dependency returned a result.
    #[serde(rename = "done")]
    Succeeded {
        /// Dependency response.
        result: Value,
    },
    /// The job failed.
    Failed(FailureReason),
    /// The breaker denied the job's call after it was dequeued.
    Rejected {
        /// Reason.
        reason: RejectReason,
    },
    /// The job was abandoned.
    Abandoned {
        /// Reason.
        reason: AbandonReason,
    },
}

impl JobOutcome {
    /// Whether the job succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Short label for metrics and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "success",
            Self::Failed(reason) => reason.as_str(),
            Self::Rejected { reason } => reason.as_str(),
            Self::Abandoned { .. } => "abandoned",
        }
    }
}

/// Where a job currently stands.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Waiting in the queue.
    Queued,
    /// Claimed by a worker.
    Running,
    /// Terminal.
    Finished(JobOutcome),
}

impl JobStatus {
    /// Whether the status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_))
    }

    /// The terminal outcome, if any.
    #[must_use]
    pub const fn outcome(&self) -> Option<&JobOutcome> {
        match self {
            Self::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct PendingStatus {
    status: &'static str,
}

impl Serialize for JobStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Queued => PendingStatus { status: "queued" }.serialize(serializer),
            Self::Running => PendingStatus { status: "running" }.serialize(serializer),
            Self::Finished(outcome) => outcome.serialize(serializer),
        }
    }
}
