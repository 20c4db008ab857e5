//! The downstream dependency and the client that calls it.
//!
//! [`Backend`] is one raw invocation. [`DownstreamClient`] wraps it with the
//! circuit breaker gate, a per-attempt timeout, deadline checks, and retry
//! with jittered exponential backoff. Demo and real backends plug in behind
//! the same trait, so nothing above this module knows which is active.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::job::{Job, JobId};
use super::outcome::{FailureReason, JobOutcome, RejectReason};
use crate::observability::metrics::{DOWNSTREAM_CALL_SECONDS, RETRIES_TOTAL};
use crate::observability::SharedMetrics;
use crate::resilience::{CallPermit, CircuitBreaker, RetryDecision, RetryPolicy, RetryState};
use crate::util::SharedClock;

/// Failure of a single backend invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Worth retrying (connection reset, 5xx, overload).
    #[error("transient: {0}")]
    Transient(String),
    /// The dependency refused the input; retrying cannot help.
    #[error("invalid input: {0}")]
    Invalid(String),
}

impl BackendError {
    /// Whether a retry might succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// One raw call to the dependency.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use backpressure_engine::core::{Backend, BackendError};
/// use serde_json::Value;
///
/// struct Echo;
///
/// #[async_trait]
/// impl Backend for Echo {
///     async fn invoke(&self, payload: &Value) -> Result<Value, BackendError> {
///         Ok(payload.clone())
///     }
/// }
/// ```
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Perform the call. Timeouts are applied by the caller.
    async fn invoke(&self, payload: &Value) -> Result<Value, BackendError>;

    /// Cheap reachability check used by readiness. The caller bounds
    /// it with a timeout.
    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Release pooled connections. Called once, after the workers stop.
    async fn close(&self) {}
}

/// How a [`DownstreamClient::call`] failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The breaker refused the attempt; the dependency was not touched.
    #[error("circuit breaker open")]
    BreakerOpen,
    /// The job's deadline passed before an attempt could start.
    #[error("deadline exceeded after {attempts} attempts")]
    DeadlineExceeded {
        /// Attempts made before the deadline check failed.
        attempts: u32,
    },
    /// A non-retryable error; no further attempts.
    #[error("non-retryable: {0}")]
    NonRetryable(String),
    /// Every attempt failed.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last_error: String,
    },
}

impl From<CallError> for JobOutcome {
    fn from(err: CallError) -> Self {
        match err {
            CallError::BreakerOpen => Self::Rejected {
                reason: RejectReason::BreakerOpen,
            },
            CallError::DeadlineExceeded { .. } => Self::Failed(FailureReason::DeadlineExceeded),
            CallError::NonRetryable(message) => {
                Self::Failed(FailureReason::NonRetryable { message })
            }
            CallError::RetriesExhausted {
                attempts,
                last_error,
            } => Self::Failed(FailureReason::RetriesExhausted {
                attempts,
                last_error,
            }),
        }
    }
}

enum Attempt {
    Ok(Value),
    Retryable(String),
    Fatal(String),
}

/// Dependency client with timeout, retry, and breaker gating.
pub struct DownstreamClient {
    backend: Arc<dyn Backend>,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
    call_timeout: Duration,
    clock: SharedClock,
    metrics: SharedMetrics,
}

impl std::fmt::Debug for DownstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownstreamClient")
            .field("policy", &self.policy)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl DownstreamClient {
    /// Assemble a client.
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        breaker: Arc<CircuitBreaker>,
        policy: RetryPolicy,
        call_timeout: Duration,
        clock: SharedClock,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            backend,
            breaker,
            policy,
            call_timeout,
            clock,
            metrics,
        }
    }

    /// The breaker gating this client.
    #[must_use]
    pub const fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run the job against the dependency.
    ///
    /// Before every attempt the deadline is checked, then the breaker is
    /// asked. Breaker denials end the call at once and consume no retry
    /// budget. Only timeouts and transient errors are retried.
    ///
    /// # Errors
    ///
    /// See [`CallError`].
    pub async fn call(&self, job: &Job) -> Result<Value, CallError> {
        let mut retry = RetryState::new(self.policy.clone());
        loop {
            if job.is_expired(self.clock.now()) {
                debug!(job_id = %job.id, attempts = retry.attempts(), "Deadline passed before attempt");
                return Err(CallError::DeadlineExceeded {
                    attempts: retry.attempts(),
                });
            }
            let Some(permit) = self.breaker.try_acquire() else {
                debug!(job_id = %job.id, "Breaker denied attempt");
                return Err(CallError::BreakerOpen);
            };

            let attempt = retry.begin_attempt();
            let last_error = match self.attempt(job.id, attempt, &job.payload, permit).await {
                Attempt::Ok(value) => return Ok(value),
                Attempt::Fatal(message) => return Err(CallError::NonRetryable(message)),
                Attempt::Retryable(message) => message,
            };

            match retry.on_failure() {
                RetryDecision::Retry { attempt, delay } => {
                    self.metrics.incr_counter(RETRIES_TOTAL, &[]);
                    debug!(
                        job_id = %job.id,
                        next_attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %last_error,
                        "Retrying downstream call"
                    );
                    self.backoff(job.deadline, delay).await;
                }
                RetryDecision::Exhausted { attempts } => {
                    warn!(job_id = %job.id, attempts = attempts, error = %last_error, "Retries exhausted");
                    return Err(CallError::RetriesExhausted {
                        attempts,
                        last_error,
                    });
                }
            }
        }
    }

    /// One call under `permit`. If this future is dropped mid-call (panic or
    /// abort), the permit's drop hands any half-open trial slot back.
    async fn attempt(
        &self,
        id: JobId,
        attempt: u32,
        payload: &Value,
        permit: CallPermit<'_>,
    ) -> Attempt {
        let started = self.clock.now();
        let result = tokio::time::timeout(self.call_timeout, self.backend.invoke(payload)).await;
        let elapsed = self
            .clock
            .now()
            .saturating_duration_since(started)
            .as_secs_f64();

        let (attempt_result, label) = match result {
            Ok(Ok(value)) => {
                permit.succeeded();
                (Attempt::Ok(value), "success")
            }
            Ok(Err(BackendError::Invalid(message))) => {
                permit.ignored();
                (Attempt::Fatal(message), "invalid")
            }
            Ok(Err(BackendError::Transient(message))) => {
                permit.failed();
                (Attempt::Retryable(message), "error")
            }
            Err(_) => {
                permit.failed();
                let message = format!("call timed out after {}ms", self.call_timeout.as_millis());
                (Attempt::Retryable(message), "timeout")
            }
        };
        self.metrics
            .observe_histogram(DOWNSTREAM_CALL_SECONDS, elapsed, &[("result", label)]);
        debug!(job_id = %id, attempt = attempt, result = label, "Downstream attempt finished");
        attempt_result
    }

    /// Sleep for `delay`, but never past the deadline.
    async fn backoff(&self, deadline: Option<Instant>, delay: Duration) {
        let delay = deadline.map_or(delay, |d| {
            delay.min(d.saturating_duration_since(self.clock.now()))
        });
        tokio::time::sleep(delay).await;
    }
}
