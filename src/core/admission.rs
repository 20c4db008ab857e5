//! Admission control: the point where backpressure becomes a rejection.
//!
//! [`AdmissionController::submit`] never blocks and never queues beyond the
//! bounded queue. Checks run in a fixed order: shutdown, breaker, in-flight
//! ceiling, queue capacity. Every rejection carries a retry-after hint.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::job::{Job, JobId, JobSpec};
use super::outcome::{FailureReason, JobOutcome, RejectReason, Rejection};
use super::queue::{BoundedQueue, EnqueueError};
use super::worker_pool::JobFinisher;
use crate::infra::ResultStore;
use crate::observability::metrics::{ACCEPTED_TOTAL, IN_FLIGHT, QUEUE_DEPTH, REJECTED_TOTAL};
use crate::observability::SharedMetrics;
use crate::resilience::CircuitBreaker;
use crate::util::SharedClock;

/// Global ceiling on admitted-but-unfinished jobs.
///
/// Reservation is a compare-and-swap loop, so concurrent admissions can
/// never push the count past `max`.
#[derive(Debug)]
pub struct InFlightLimiter {
    current: AtomicUsize,
    max: usize,
}

impl InFlightLimiter {
    /// Create a limiter with ceiling `max`.
    #[must_use]
    pub const fn new(max: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            max,
        }
    }

    /// Reserve one slot. `false` at the ceiling.
    pub fn try_acquire(&self) -> bool {
        self.current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .is_ok()
    }

    /// Return one slot. Saturates at zero.
    pub fn release(&self) {
        let _ = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Slots held.
    #[must_use]
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Ceiling.
    #[must_use]
    pub const fn max(&self) -> usize {
        self.max
    }
}

const EWMA_ALPHA: f64 = 0.2;

/// Exponentially weighted service time, used to turn queue depth into a
/// retry-after estimate.
#[derive(Debug)]
pub struct ThroughputEstimator {
    pool_size: usize,
    ewma_secs: Mutex<Option<f64>>,
}

impl ThroughputEstimator {
    /// Estimator for a pool of `pool_size` workers.
    #[must_use]
    pub const fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            ewma_secs: Mutex::new(None),
        }
    }

    /// Fold in one observed service time.
    pub fn record(&self, service_time: Duration) {
        let sample = service_time.as_secs_f64();
        let mut ewma = self.ewma_secs.lock();
        *ewma = Some(match *ewma {
            Some(prev) => EWMA_ALPHA.mul_add(sample, (1.0 - EWMA_ALPHA) * prev),
            None => sample,
        });
    }

    /// Smoothed service time, once at least one job has finished.
    #[must_use]
    pub fn service_time(&self) -> Option<Duration> {
        (*self.ewma_secs.lock()).map(Duration::from_secs_f64)
    }

    /// Jobs per second the pool drains, if known.
    #[must_use]
    pub fn throughput(&self) -> Option<f64> {
        let secs = (*self.ewma_secs.lock())?;
        (secs > 0.0).then(|| self.pool_size as f64 / secs)
    }

    /// `ceil(depth / throughput)` seconds clamped to `[min, max]`. Without a
    /// sample the floor is returned.
    #[must_use]
    pub fn retry_after(&self, depth: usize, min: Duration, max: Duration) -> Duration {
        let Some(throughput) = self.throughput() else {
            return min;
        };
        let secs = (depth as f64 / throughput).ceil();
        Duration::from_secs_f64(secs.max(0.0)).clamp(min, max.max(min))
    }
}

/// Result of an admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The job is queued.
    Accepted {
        /// Identifier for status lookup.
        id: JobId,
        /// Queue depth right after insertion.
        queue_depth: usize,
    },
    /// The job was turned away.
    Rejected(Rejection),
}

/// Hints bounding the retry-after estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAfterBounds {
    /// Floor.
    pub min: Duration,
    /// Ceiling.
    pub max: Duration,
}

impl Default for RetryAfterBounds {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

/// Decides whether new work enters the system.
pub struct AdmissionController {
    queue: Arc<BoundedQueue>,
    results: Arc<ResultStore>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<InFlightLimiter>,
    estimator: Arc<ThroughputEstimator>,
    finisher: Arc<JobFinisher>,
    shutting_down: Arc<AtomicBool>,
    bounds: RetryAfterBounds,
    clock: SharedClock,
    metrics: SharedMetrics,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("queue", &self.queue)
            .field("limiter", &self.limiter)
            .field("bounds", &self.bounds)
            .finish_non_exhaustive()
    }
}

/// Shared components the controller reads and updates.
#[derive(Clone)]
pub struct AdmissionParts {
    /// Queue fed by admission.
    pub queue: Arc<BoundedQueue>,
    /// Status slots.
    pub results: Arc<ResultStore>,
    /// Breaker peeked before admitting.
    pub breaker: Arc<CircuitBreaker>,
    /// In-flight ceiling.
    pub limiter: Arc<InFlightLimiter>,
    /// Service-time estimate.
    pub estimator: Arc<ThroughputEstimator>,
    /// Terminal bookkeeping for jobs evicted at admission.
    pub finisher: Arc<JobFinisher>,
    /// Set once shutdown begins.
    pub shutting_down: Arc<AtomicBool>,
    /// Time source.
    pub clock: SharedClock,
    /// Metrics sink.
    pub metrics: SharedMetrics,
}

impl AdmissionController {
    /// Assemble a controller over shared components.
    #[must_use]
    pub fn new(parts: AdmissionParts, bounds: RetryAfterBounds) -> Self {
        Self {
            queue: parts.queue,
            results: parts.results,
            breaker: parts.breaker,
            limiter: parts.limiter,
            estimator: parts.estimator,
            finisher: parts.finisher,
            shutting_down: parts.shutting_down,
            bounds,
            clock: parts.clock,
            metrics: parts.metrics,
        }
    }

    /// Admit or reject, without blocking.
    pub fn submit(&self, spec: JobSpec) -> Admission {
        if self.shutting_down.load(Ordering::Acquire) {
            return self.reject(RejectReason::ShuttingDown, Duration::ZERO);
        }
        if self.breaker.is_open() {
            let wait = self.breaker.remaining_cooldown();
            return self.reject(RejectReason::BreakerOpen, wait);
        }
        if !self.limiter.try_acquire() {
            let reason = if self.queue.is_full() {
                RejectReason::QueueFull
            } else {
                RejectReason::Overloaded
            };
            return self.reject(reason, self.backlog_retry_after());
        }

        let job = Job::from_spec(spec, self.clock.now());
        let id = job.id;
        self.results.create(id);

        let job = match self.queue.try_enqueue(job) {
            Ok(depth) => return self.accepted(id, depth),
            Err(EnqueueError::Closed(_)) => {
                self.roll_back(id);
                return self.reject(RejectReason::ShuttingDown, Duration::ZERO);
            }
            Err(EnqueueError::Full(job)) => job,
        };

        // Full: make room by expiring jobs that can no longer meet their
        // deadline, then try once more.
        if self.evict_expired() > 0 {
            match self.queue.try_enqueue(job) {
                Ok(depth) => return self.accepted(id, depth),
                Err(EnqueueError::Closed(_)) => {
                    self.roll_back(id);
                    return self.reject(RejectReason::ShuttingDown, Duration::ZERO);
                }
                Err(EnqueueError::Full(_)) => {}
            }
        }
        self.roll_back(id);
        self.reject(RejectReason::QueueFull, self.backlog_retry_after())
    }

    /// Retry-after hint derived from the current backlog.
    #[must_use]
    pub fn backlog_retry_after(&self) -> Duration {
        self.estimator
            .retry_after(self.queue.len(), self.bounds.min, self.bounds.max)
    }

    /// Whether admission is closed for shutdown.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn evict_expired(&self) -> usize {
        let expired = self.queue.take_expired(self.clock.now());
        let count = expired.len();
        for job in expired {
            debug!(job_id = %job.id, "Evicting expired job to make room");
            self.finisher
                .finish(job.id, JobOutcome::Failed(FailureReason::DeadlineExceeded), None);
        }
        count
    }

    fn accepted(&self, id: JobId, depth: usize) -> Admission {
        self.metrics.incr_counter(ACCEPTED_TOTAL, &[]);
        self.metrics.set_gauge(QUEUE_DEPTH, depth as f64, &[]);
        self.metrics
            .set_gauge(IN_FLIGHT, self.limiter.current() as f64, &[]);
        debug!(job_id = %id, queue_depth = depth, "Job admitted");
        Admission::Accepted {
            id,
            queue_depth: depth,
        }
    }

    fn roll_back(&self, id: JobId) {
        self.results.remove(&id);
        self.limiter.release();
    }

    fn reject(&self, reason: RejectReason, retry_after: Duration) -> Admission {
        self.metrics
            .incr_counter(REJECTED_TOTAL, &[("reason", reason.as_str())]);
        debug!(
            reason = reason.as_str(),
            retry_after_ms = retry_after.as_millis() as u64,
            "Submission rejected"
        );
        Admission::Rejected(Rejection {
            reason,
            retry_after,
        })
    }
}
