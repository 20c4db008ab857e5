//! The engine facade: one object owning the queue, pool, breaker, and
//! admission controller, wired from an [`EngineConfig`].
//!
//! ```rust,ignore
//! let engine = Engine::start(config, Arc::new(SimulatedBackend::new(..)), metrics)?;
//! match engine.submit(JobSpec::new(json!({"n": 1}))).await {
//!     SubmitResponse::Enqueued { id, .. } => println!("queued {id}"),
//!     SubmitResponse::Completed { outcome, .. } => println!("{outcome:?}"),
//!     SubmitResponse::Rejected(r) => println!("retry in {}s", r.retry_after_secs()),
//! }
//! let report = engine.shutdown().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use super::admission::{
    Admission, AdmissionController, AdmissionParts, InFlightLimiter, ThroughputEstimator,
};
use super::downstream::{Backend, DownstreamClient};
use super::error::EngineError;
use super::job::{JobId, JobSpec};
use super::outcome::{FailureReason, JobOutcome, JobStatus, Rejection};
use super::queue::BoundedQueue;
use super::worker_pool::{JobFinisher, PoolStats, ShutdownReport, WorkerContext, WorkerPool};
use crate::config::{AdmissionMode, EngineConfig};
use crate::infra::{ResultStore, WaitError};
use crate::observability::SharedMetrics;
use crate::resilience::{CircuitBreaker, CircuitState};
use crate::util::{SharedClock, SystemClock};

/// Answer to a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitResponse {
    /// Queued; poll or wait by id.
    Enqueued {
        /// Job identifier.
        id: JobId,
        /// Queue depth right after insertion.
        queue_depth: usize,
        /// Queue capacity.
        queue_capacity: usize,
    },
    /// Wait mode: the job's outcome, or `Failed(Timeout)` if the request
    /// timeout elapsed first.
    Completed {
        /// Job identifier.
        id: JobId,
        /// Terminal outcome.
        outcome: JobOutcome,
    },
    /// Turned away at admission.
    Rejected(Rejection),
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    /// Jobs waiting.
    pub queue_depth: usize,
    /// Queue capacity.
    pub queue_capacity: usize,
    /// Admitted jobs not yet terminal.
    pub in_flight: usize,
    /// In-flight ceiling.
    pub max_in_flight: usize,
    /// Breaker state.
    pub breaker_state: CircuitState,
    /// Worker pool counters.
    pub pool: PoolStats,
    /// Time since start.
    pub uptime_secs: u64,
}

/// Backpressure-aware execution engine.
pub struct Engine {
    config: EngineConfig,
    queue: Arc<BoundedQueue>,
    results: Arc<ResultStore>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<InFlightLimiter>,
    admission: AdmissionController,
    pool: WorkerPool,
    backend: Arc<dyn Backend>,
    shutting_down: Arc<AtomicBool>,
    backend_closed: AtomicBool,
    metrics: SharedMetrics,
    started_at: Instant,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Validate `config` and start the workers. Must be called inside a
    /// tokio runtime.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] if validation fails.
    pub fn start(
        config: EngineConfig,
        backend: Arc<dyn Backend>,
        metrics: SharedMetrics,
    ) -> Result<Self, EngineError> {
        Self::start_with_clock(config, backend, metrics, Arc::new(SystemClock))
    }

    /// [`start`](Self::start) with an explicit time source.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] if validation fails.
    pub fn start_with_clock(
        config: EngineConfig,
        backend: Arc<dyn Backend>,
        metrics: SharedMetrics,
        clock: SharedClock,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let queue = Arc::new(BoundedQueue::new(config.queue_capacity));
        let results = Arc::new(ResultStore::new(config.result_retention));
        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker_config(),
            clock.clone(),
            metrics.clone(),
        ));
        let limiter = Arc::new(InFlightLimiter::new(config.effective_max_in_flight()));
        let estimator = Arc::new(ThroughputEstimator::new(config.pool_size));
        let finisher = Arc::new(JobFinisher::new(
            results.clone(),
            limiter.clone(),
            estimator.clone(),
            metrics.clone(),
        ));
        let client = Arc::new(DownstreamClient::new(
            backend.clone(),
            breaker.clone(),
            config.retry_policy(),
            config.call_timeout(),
            clock.clone(),
            metrics.clone(),
        ));
        let shutting_down = Arc::new(AtomicBool::new(false));

        let admission = AdmissionController::new(
            AdmissionParts {
                queue: queue.clone(),
                results: results.clone(),
                breaker: breaker.clone(),
                limiter: limiter.clone(),
                estimator,
                finisher: finisher.clone(),
                shutting_down: shutting_down.clone(),
                clock: clock.clone(),
                metrics: metrics.clone(),
            },
            config.retry_after_bounds(),
        );
        let pool = WorkerPool::start(
            config.pool_size,
            WorkerContext {
                queue: queue.clone(),
                results: results.clone(),
                client,
                finisher,
                clock,
                metrics: metrics.clone(),
            },
        );

        info!(
            queue_capacity = config.queue_capacity,
            pool_size = config.pool_size,
            max_in_flight = limiter.max(),
            admission_mode = ?config.admission_mode,
            "Engine started"
        );

        Ok(Self {
            config,
            queue,
            results,
            breaker,
            limiter,
            admission,
            pool,
            backend,
            shutting_down,
            backend_closed: AtomicBool::new(false),
            metrics,
            started_at: Instant::now(),
        })
    }

    /// Submit honoring the configured admission mode.
    pub async fn submit(&self, spec: JobSpec) -> SubmitResponse {
        match self.config.admission_mode {
            AdmissionMode::Enqueue => self.enqueue(spec),
            AdmissionMode::Wait => self.submit_and_wait(spec).await,
        }
    }

    /// Submit and return as soon as the job is queued.
    pub fn enqueue(&self, spec: JobSpec) -> SubmitResponse {
        match self.admission.submit(spec) {
            Admission::Accepted { id, queue_depth } => SubmitResponse::Enqueued {
                id,
                queue_depth,
                queue_capacity: self.queue.capacity(),
            },
            Admission::Rejected(rejection) => SubmitResponse::Rejected(rejection),
        }
    }

    /// Submit and wait for the outcome, bounded by the request timeout.
    pub async fn submit_and_wait(&self, spec: JobSpec) -> SubmitResponse {
        let id = match self.admission.submit(spec) {
            Admission::Accepted { id, .. } => id,
            Admission::Rejected(rejection) => return SubmitResponse::Rejected(rejection),
        };
        let outcome = match self.wait(id, self.config.request_timeout()).await {
            Ok(outcome) => outcome,
            // The job keeps running; only this caller stops waiting.
            Err(WaitError::TimedOut | WaitError::NotFound) => {
                JobOutcome::Failed(FailureReason::Timeout)
            }
        };
        SubmitResponse::Completed { id, outcome }
    }

    /// Current status of a job.
    ///
    /// # Errors
    ///
    /// [`EngineError::JobNotFound`] if unknown or evicted.
    pub fn status(&self, id: JobId) -> Result<JobStatus, EngineError> {
        self.results.status(&id).ok_or(EngineError::JobNotFound(id))
    }

    /// Wait up to `timeout` for a job's outcome.
    ///
    /// # Errors
    ///
    /// See [`WaitError`].
    pub async fn wait(&self, id: JobId, timeout: Duration) -> Result<JobOutcome, WaitError> {
        self.results.wait(&id, timeout).await
    }

    /// Snapshot of queue, in-flight, breaker, and pool state.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            queue_depth: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            in_flight: self.limiter.current(),
            max_in_flight: self.limiter.max(),
            breaker_state: self.breaker.state(),
            pool: self.pool.stats(),
            uptime_secs: self.uptime().as_secs(),
        }
    }

    /// Breaker state.
    #[must_use]
    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// The breaker itself.
    #[must_use]
    pub const fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Whether new work is accepted.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.admission.is_shutting_down()
    }

    /// Ask the backend whether it is reachable, bounded by
    /// `health_check_timeout`. A timeout counts as unhealthy.
    pub async fn check_dependency(&self) -> bool {
        let timeout = self.config.health_check_timeout();
        match tokio::time::timeout(timeout, self.backend.health_check()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Downstream health check failed");
                false
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Downstream health check timed out");
                false
            }
        }
    }

    /// Time since start.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Metrics sink.
    #[must_use]
    pub const fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Stop admitting new work. Readiness turns false; queued and running
    /// jobs are untouched. Idempotent.
    pub fn begin_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            info!("Engine shutting down, no longer admitting");
        }
    }

    /// Stop admitting, abandon queued jobs, wait up to the configured
    /// grace period for running ones, then close the backend. Idempotent.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.begin_shutdown();
        let report = self.pool.shutdown(self.config.shutdown_grace()).await;
        if !self.backend_closed.swap(true, Ordering::AcqRel) {
            self.backend.close().await;
        }
        report
    }
}
