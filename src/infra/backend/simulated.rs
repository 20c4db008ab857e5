//! Demo-mode dependency: random latency and random transient failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};

use crate::core::downstream::{Backend, BackendError};
use crate::util::now_ms;

/// In-process stand-in for the real dependency.
///
/// Latency is uniform in `[latency, latency + jitter)`. A `null` payload is
/// refused as invalid input; anything else succeeds or fails transiently
/// with probability `failure_rate`.
#[derive(Debug)]
pub struct SimulatedBackend {
    latency: Duration,
    jitter: Duration,
    failure_rate: f64,
    calls: AtomicU64,
}

impl SimulatedBackend {
    /// Create a simulator. `failure_rate` is clamped to `[0, 1]`.
    #[must_use]
    pub fn new(latency: Duration, jitter: Duration, failure_rate: f64) -> Self {
        Self {
            latency,
            jitter,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            calls: AtomicU64::new(0),
        }
    }

    /// Invocations so far.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Backend for SimulatedBackend {
    async fn invoke(&self, payload: &Value) -> Result<Value, BackendError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let (delay, fail) = {
            let mut rng = rand::rng();
            let delay = self.latency + self.jitter.mul_f64(rng.random::<f64>());
            (delay, rng.random::<f64>() < self.failure_rate)
        };
        tokio::time::sleep(delay).await;

        if payload.is_null() {
            return Err(BackendError::Invalid("payload must not be null".into()));
        }
        if fail {
            return Err(BackendError::Transient("simulated downstream failure".into()));
        }
        Ok(json!({
            "result": payload,
            "processed_at_ms": u64::try_from(now_ms()).unwrap_or(u64::MAX),
        }))
    }

    /// A health check costs one base-latency round trip and never fails.
    async fn health_check(&self) -> Result<(), BackendError> {
        tokio::time::sleep(self.latency).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn echoes_payload_when_healthy() {
        let backend = SimulatedBackend::new(Duration::from_millis(10), Duration::ZERO, 0.0);
        let out = backend.invoke(&json!({"n": 3})).await.unwrap();
        assert_eq!(out["result"], json!({"n": 3}));
        assert!(out["processed_at_ms"].as_u64().is_some());
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn always_fails_at_full_failure_rate() {
        let backend = SimulatedBackend::new(Duration::ZERO, Duration::ZERO, 1.0);
        for _ in 0..5 {
            assert!(matches!(
                backend.invoke(&json!(1)).await,
                Err(BackendError::Transient(_))
            ));
        }
        assert_eq!(backend.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn null_payload_is_invalid() {
        let backend = SimulatedBackend::new(Duration::ZERO, Duration::ZERO, 0.0);
        let err = backend.invoke(&Value::Null).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn health_check_takes_base_latency_and_is_not_a_call() {
        let backend = SimulatedBackend::new(Duration::from_millis(50), Duration::ZERO, 1.0);
        let started = tokio::time::Instant::now();
        assert!(backend.health_check().await.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_stays_within_jitter_band() {
        let backend =
            SimulatedBackend::new(Duration::from_millis(200), Duration::from_millis(400), 0.0);
        let started = tokio::time::Instant::now();
        backend.invoke(&json!(1)).await.unwrap();
        let took = started.elapsed();
        assert!(took >= Duration::from_millis(200));
        assert!(took < Duration::from_millis(601));
    }
}
