//! # Backpressure Engine
//!
//! Admission control and bounded worker-pool execution in front of a slow or
//! unreliable downstream dependency.
//!
//! When producers outpace the dependency, work is not buffered without
//! limit. It is rejected at the door with a reason and a retry-after hint,
//! so callers can back off. Accepted work drains through a fixed pool of
//! workers; each call to the dependency is retried with jittered exponential
//! backoff and gated by a circuit breaker.
//!
//! ## Key Features
//!
//! - **Bounded admission**: fixed-capacity priority queue plus a global
//!   in-flight ceiling; rejections are `QueueFull`, `Overloaded`,
//!   `BreakerOpen`, or `ShuttingDown`
//! - **Worker pool**: `pool_size` tokio tasks, panics isolated per job
//! - **Retry with jitter**: monotone, capped backoff; total attempts bounded
//! - **Circuit breaker**: count or ratio trip over a rolling window,
//!   half-open trials after a cooldown
//! - **Deadlines**: checked at dequeue and before every attempt
//! - **Graceful shutdown**: queued and cancelled jobs end as `Abandoned`
//! - **Observability**: `tracing` logs and a pluggable [`MetricsSink`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use backpressure_engine::builders::EngineBuilder;
//! use backpressure_engine::config::EngineConfig;
//! use backpressure_engine::core::{JobSpec, SubmitResponse};
//! use serde_json::json;
//!
//! let engine = EngineBuilder::new(EngineConfig::default()).build()?;
//! match engine.enqueue(JobSpec::new(json!({"order": 42}))) {
//!     SubmitResponse::Enqueued { id, .. } => println!("queued {id}"),
//!     SubmitResponse::Rejected(r) => println!("back off for {}s", r.retry_after_secs()),
//!     SubmitResponse::Completed { .. } => unreachable!(),
//! }
//! engine.shutdown().await;
//! ```
//!
//! [`MetricsSink`]: observability::MetricsSink

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core engine: jobs, admission, queue, worker pool, downstream client.
pub mod core;
/// Configuration models and loaders.
pub mod config;
/// Builders to construct the engine from configuration.
pub mod builders;
/// Infrastructure adapters: queue buffer, result store, backends.
pub mod infra;
/// Metrics sink interface and backends.
pub mod observability;
/// Circuit breaker and retry policy.
pub mod resilience;
/// HTTP surface and API models.
pub mod runtime;
/// Shared utilities.
pub mod util;
