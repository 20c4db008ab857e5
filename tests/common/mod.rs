//! Shared test backends and engine helpers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backpressure_engine::builders::EngineBuilder;
use backpressure_engine::config::EngineConfig;
use backpressure_engine::core::{Backend, BackendError, Engine, JobId, JobOutcome};
use backpressure_engine::observability::InMemoryMetrics;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;

// ============================================================================
// ENGINE HELPERS
// ============================================================================

/// Small, fast configuration: no retry delay to speak of, lenient breaker.
pub fn test_config(queue_capacity: usize, pool_size: usize) -> EngineConfig {
    EngineConfig {
        queue_capacity,
        pool_size,
        request_timeout_ms: 2_000,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        retry_jitter: 0.0,
        breaker_failure_threshold: 1_000,
        call_timeout_ms: 1_000,
        shutdown_grace_ms: 500,
        demo_latency_ms: 0,
        demo_latency_jitter_ms: 0,
        demo_failure_rate: 0.0,
        ..EngineConfig::default()
    }
}

/// Start an engine over `backend`, reporting into a fresh in-memory sink.
pub fn start_engine(config: EngineConfig, backend: Arc<dyn Backend>) -> (Arc<Engine>, Arc<InMemoryMetrics>) {
    let metrics = Arc::new(InMemoryMetrics::new());
    let engine = EngineBuilder::new(config)
        .with_backend(backend)
        .with_metrics(metrics.clone())
        .build()
        .expect("engine should start");
    (Arc::new(engine), metrics)
}

/// Wait for a job's outcome, failing the test if it takes too long.
pub async fn outcome_of(engine: &Engine, id: JobId) -> JobOutcome {
    engine
        .wait(id, Duration::from_secs(5))
        .await
        .expect("job should finish")
}

/// Poll `cond` until it holds, for at most two seconds.
pub async fn eventually<F: Fn() -> bool>(cond: F) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

// ============================================================================
// TEST BACKENDS - Real implementations for testing
// ============================================================================

/// Holds every call until released; records payloads in call order.
pub struct GateBackend {
    gate: Semaphore,
    started: AtomicU64,
    seen: Mutex<Vec<Value>>,
}

impl GateBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            started: AtomicU64::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Let `n` held calls through.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Let every current and future call through.
    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Value> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Backend for GateBackend {
    async fn invoke(&self, payload: &Value) -> Result<Value, BackendError> {
        self.seen.lock().push(payload.clone());
        self.started.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        permit.forget();
        Ok(payload.clone())
    }
}

/// Tracks total calls and peak concurrency (CAS max).
pub struct CountingBackend {
    latency: Duration,
    calls: AtomicU64,
    current: AtomicU64,
    max_concurrent: AtomicU64,
}

impl CountingBackend {
    pub fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            calls: AtomicU64::new(0),
            current: AtomicU64::new(0),
            max_concurrent: AtomicU64::new(0),
        })
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> u64 {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for CountingBackend {
    async fn invoke(&self, payload: &Value) -> Result<Value, BackendError> {
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        let mut max = self.max_concurrent.load(Ordering::SeqCst);
        while current > max {
            match self.max_concurrent.compare_exchange_weak(
                max,
                current,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(m) => max = m,
            }
        }

        tokio::time::sleep(self.latency).await;

        self.current.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(payload.clone())
    }
}

/// Fails transiently while `failing` is set; panics on `{"panic": true}`.
/// Its health check fails while `failing` is set too.
pub struct FlakyBackend {
    failing: AtomicBool,
    latency: Duration,
    calls: AtomicU64,
    closes: AtomicU64,
}

impl FlakyBackend {
    pub fn failing() -> Arc<Self> {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            failing: AtomicBool::new(true),
            latency,
            calls: AtomicU64::new(0),
            closes: AtomicU64::new(0),
        })
    }

    pub fn healthy() -> Arc<Self> {
        let backend = Self::failing();
        backend.recover();
        backend
    }

    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for FlakyBackend {
    async fn invoke(&self, payload: &Value) -> Result<Value, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if payload.get("panic").and_then(Value::as_bool) == Some(true) {
            panic!("backend blew up");
        }
        if payload.get("invalid").and_then(Value::as_bool) == Some(true) {
            return Err(BackendError::Invalid("rejected input".into()));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::Transient("dependency unavailable".into()));
        }
        Ok(payload.clone())
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::Transient("dependency unavailable".into()));
        }
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
