//! Core engine: job model, admission, queue, worker pool, and the
//! downstream client.

pub mod admission;
pub mod downstream;
pub mod engine;
pub mod error;
pub mod job;
pub mod outcome;
pub mod queue;
pub mod worker_pool;

pub use admission::{Admission, AdmissionController, InFlightLimiter, RetryAfterBounds, ThroughputEstimator};
pub use downstream::{Backend, BackendError, CallError, DownstreamClient};
pub use engine::{Engine, EngineStats, SubmitResponse};
pub use error::{AppResult, EngineError};
pub use job::{Job, JobId, JobSpec, Priority};
pub use outcome::{AbandonReason, FailureReason, JobOutcome, JobStatus, RejectReason, Rejection};
pub use queue::{BoundedQueue, EnqueueError};
pub use worker_pool::{JobFinisher, PoolStats, ShutdownReport, WorkerContext, WorkerPool};
