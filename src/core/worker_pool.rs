//! Fixed-size pool of async workers draining the bounded queue.
//!
//! Each worker loops: dequeue, check the deadline, run the job through the
//! [`DownstreamClient`], record the terminal outcome. The job itself runs in
//! its own spawned task so a panic surfaces as a `JoinError` and becomes
//! `Failed(Crashed)` while the worker carries on.
//!
//! # Shutdown
//!
//! 1. Close the queue and drain it; drained jobs become `Abandoned(Shutdown)`.
//! 2. Give busy workers up to the grace period to finish their current job.
//! 3. Signal forced cancellation; in-flight jobs are aborted and recorded as
//!    `Abandoned(Shutdown)`.
//!
//! # Example
//!
//! ```rust,ignore
//! let pool = WorkerPool::start(4, context);
//! let report = pool.shutdown(Duration::from_secs(10)).await;
//! ```

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use super::admission::{InFlightLimiter, ThroughputEstimator};
use super::downstream::DownstreamClient;
use super::job::JobId;
use super::outcome::{AbandonReason, FailureReason, JobOutcome};
use super::queue::BoundedQueue;
use crate::infra::ResultStore;
use crate::observability::metrics::{
    ABANDONED_TOTAL, IN_FLIGHT, JOB_DURATION_SECONDS, PROCESSED_FAILURE_TOTAL,
    PROCESSED_SUCCESS_TOTAL, QUEUE_DEPTH, WORKER_OCCUPANCY,
};
use crate::observability::SharedMetrics;
use crate::util::SharedClock;

/// Statistics about pool utilization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Number of workers.
    pub worker_count: usize,
    /// Jobs currently executing.
    pub active: u64,
    /// Jobs that succeeded.
    pub completed: u64,
    /// Jobs that failed or were refused by the breaker after dequeue.
    pub failed: u64,
    /// Jobs abandoned at shutdown.
    pub abandoned: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub abandoned: AtomicU64,
    pub abandoned_in_flight: AtomicU64,
    /// Held while `active` changes and the occupancy gauge is written, so
    /// the last write always carries the latest count.
    pub occupancy: Mutex<()>,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// What [`WorkerPool::shutdown`] gave up on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Jobs still waiting in the queue.
    pub abandoned_queued: usize,
    /// Jobs cancelled mid-execution after the grace period.
    pub abandoned_in_flight: usize,
}

/// Records terminal outcomes exactly once and releases what the job held.
///
/// Shared by the workers, by admission (jobs evicted for an expired
/// deadline), and by shutdown.
pub struct JobFinisher {
    results: Arc<ResultStore>,
    limiter: Arc<InFlightLimiter>,
    estimator: Arc<ThroughputEstimator>,
    counters: Arc<PoolCounters>,
    metrics: SharedMetrics,
}

impl std::fmt::Debug for JobFinisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobFinisher")
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl JobFinisher {
    /// Bookkeeper over the shared result store, limiter, and estimator.
    #[must_use]
    pub fn new(
        results: Arc<ResultStore>,
        limiter: Arc<InFlightLimiter>,
        estimator: Arc<ThroughputEstimator>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            results,
            limiter,
            estimator,
            counters: Arc::new(PoolCounters::default()),
            metrics,
        }
    }

    /// Record `outcome` for `id`. `service_time` is how long the job ran,
    /// if it ran at all.
    ///
    /// Returns `false` (and touches nothing) if an outcome was already
    /// recorded, so the in-flight slot is released exactly once.
    pub fn finish(&self, id: JobId, outcome: JobOutcome, service_time: Option<Duration>) -> bool {
        let label = outcome.label();
        let counter = match &outcome {
            JobOutcome::Succeeded { .. } => {
                self.metrics.incr_counter(PROCESSED_SUCCESS_TOTAL, &[]);
                &self.counters.completed
            }
            JobOutcome::Failed(reason) => {
                self.metrics
                    .incr_counter(PROCESSED_FAILURE_TOTAL, &[("reason", reason.as_str())]);
                &self.counters.failed
            }
            JobOutcome::Rejected { reason } => {
                self.metrics
                    .incr_counter(PROCESSED_FAILURE_TOTAL, &[("reason", reason.as_str())]);
                &self.counters.failed
            }
            JobOutcome::Abandoned { .. } => {
                self.metrics.incr_counter(ABANDONED_TOTAL, &[]);
                &self.counters.abandoned
            }
        };
        let abandoned = matches!(outcome, JobOutcome::Abandoned { .. });

        if !self.results.complete(&id, outcome) {
            return false;
        }
        counter.fetch_add(1, Ordering::Relaxed);
        self.limiter.release();
        self.metrics
            .set_gauge(IN_FLIGHT, self.limiter.current() as f64, &[]);

        if let Some(elapsed) = service_time {
            self.metrics.observe_histogram(
                JOB_DURATION_SECONDS,
                elapsed.as_secs_f64(),
                &[("outcome", label)],
            );
            if !abandoned {
                self.estimator.record(elapsed);
            }
        }
        debug!(job_id = %id, outcome = label, "Job finished");
        true
    }

    /// Current pool statistics for `worker_count` workers.
    #[must_use]
    pub fn stats(&self, worker_count: usize) -> PoolStats {
        self.counters.snapshot(worker_count)
    }
}

/// Everything a worker needs.
#[derive(Clone)]
pub struct WorkerContext {
    /// Source of jobs.
    pub queue: Arc<BoundedQueue>,
    /// Status slots; jobs are marked running here.
    pub results: Arc<ResultStore>,
    /// Dependency client.
    pub client: Arc<DownstreamClient>,
    /// Terminal bookkeeping.
    pub finisher: Arc<JobFinisher>,
    /// Time source.
    pub clock: SharedClock,
    /// Metrics sink.
    pub metrics: SharedMetrics,
}

/// Fixed-size set of tokio worker tasks.
pub struct WorkerPool {
    worker_count: usize,
    context: WorkerContext,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: watch::Sender<bool>,
    report: tokio::sync::Mutex<Option<ShutdownReport>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawn `worker_count` workers. Must be called inside a tokio runtime.
    #[must_use]
    pub fn start(worker_count: usize, context: WorkerContext) -> Self {
        let (cancel, _) = watch::channel(false);
        let workers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(run_worker(worker_id, context.clone(), cancel.subscribe()))
            })
            .collect();
        context.metrics.set_gauge(WORKER_OCCUPANCY, 0.0, &[]);

        info!(worker_count = worker_count, "WorkerPool started");

        Self {
            worker_count,
            context,
            workers: Mutex::new(workers),
            cancel,
            report: tokio::sync::Mutex::new(None),
        }
    }

    /// Number of workers.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.context.finisher.stats(self.worker_count)
    }

    /// Drain and stop. Idempotent: later calls wait for the first to finish
    /// and return the same report.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let mut report = self.report.lock().await;
        if let Some(done) = *report {
            return done;
        }
        info!(grace_ms = grace.as_millis() as u64, "Shutting down worker pool");

        let drained = self.context.queue.close_and_drain();
        let abandoned_queued = drained
            .into_iter()
            .filter(|job| {
                self.context
                    .finisher
                    .finish(job.id, abandoned_outcome(), None)
            })
            .count();
        self.context.metrics.set_gauge(QUEUE_DEPTH, 0.0, &[]);

        let mut handles = std::mem::take(&mut *self.workers.lock());
        let deadline = tokio::time::Instant::now() + grace;
        let mut pending = Vec::new();
        for mut handle in handles.drain(..) {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                pending.push(handle);
            }
        }
        if !pending.is_empty() {
            warn!(
                busy_workers = pending.len(),
                "Grace period elapsed, cancelling in-flight jobs"
            );
            self.cancel.send_replace(true);
            for handle in pending {
                let _ = handle.await;
            }
        }

        let done = ShutdownReport {
            abandoned_queued,
            abandoned_in_flight: self
                .context
                .finisher
                .counters
                .abandoned_in_flight
                .load(Ordering::Relaxed) as usize,
        };
        info!(
            abandoned_queued = done.abandoned_queued,
            abandoned_in_flight = done.abandoned_in_flight,
            "Worker pool stopped"
        );
        *report = Some(done);
        done
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for handle in self.workers.get_mut().drain(..) {
            handle.abort();
        }
    }
}

const fn abandoned_outcome() -> JobOutcome {
    JobOutcome::Abandoned {
        reason: AbandonReason::Shutdown,
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => describe_panic(payload.as_ref()),
        Err(err) => err.to_string(),
    }
}

fn describe_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker task panicked".to_string()
    }
}

/// Move the active count by one and publish the result.
fn adjust_occupancy(ctx: &WorkerContext, started: bool) {
    let counters = &ctx.finisher.counters;
    let _publishing = counters.occupancy.lock();
    let active = if started {
        counters.active.fetch_add(1, Ordering::AcqRel) + 1
    } else {
        counters.active.fetch_sub(1, Ordering::AcqRel) - 1
    };
    ctx.metrics.set_gauge(WORKER_OCCUPANCY, active as f64, &[]);
}

/// Worker main loop (runs until the queue is closed and empty).
async fn run_worker(worker_id: usize, ctx: WorkerContext, mut cancel: watch::Receiver<bool>) {
    debug!(worker_id = worker_id, "Worker started");

    while let Some(job) = ctx.queue.dequeue().await {
        let id = job.id;
        ctx.metrics
            .set_gauge(QUEUE_DEPTH, ctx.queue.len() as f64, &[]);

        if job.is_expired(ctx.clock.now()) {
            debug!(worker_id = worker_id, job_id = %id, "Job expired while queued");
            ctx.finisher
                .finish(id, JobOutcome::Failed(FailureReason::DeadlineExceeded), None);
            continue;
        }

        ctx.results.mark_running(&id);
        adjust_occupancy(&ctx, true);
        debug!(worker_id = worker_id, job_id = %id, "Worker executing job");

        let started = ctx.clock.now();
        let client = Arc::clone(&ctx.client);
        let mut task = tokio::spawn(async move { client.call(&job).await });

        let outcome = tokio::select! {
            joined = &mut task => match joined {
                Ok(Ok(result)) => JobOutcome::Succeeded { result },
                Ok(Err(err)) => err.into(),
                Err(err) if err.is_panic() => {
                    let message = panic_message(err);
                    warn!(worker_id = worker_id, job_id = %id, panic = %message, "Job panicked");
                    JobOutcome::Failed(FailureReason::Crashed { message })
                }
                Err(_) => abandoned_outcome(),
            },
            _ = cancel.changed() => {
                task.abort();
                ctx.finisher
                    .counters
                    .abandoned_in_flight
                    .fetch_add(1, Ordering::Relaxed);
                debug!(worker_id = worker_id, job_id = %id, "Job cancelled at shutdown");
                abandoned_outcome()
            }
        };

        adjust_occupancy(&ctx, false);

        let service_time = ctx.clock.now().saturating_duration_since(started);
        ctx.finisher.finish(id, outcome, Some(service_time));
    }

    debug!(worker_id = worker_id, "Worker exiting");
}
