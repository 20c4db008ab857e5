//! Build an [`Engine`] from configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::EngineConfig;
use crate::core::{Backend, Engine, EngineError};
use crate::infra::{CachedBackend, HttpBackend, SimulatedBackend, TtlCache};
use crate::observability::{PrometheusMetrics, SharedMetrics};
use crate::util::{SharedClock, SystemClock};

/// Assembles an engine: chooses the backend from `demo_mode` /
/// `downstream_url` unless one is supplied, puts a [`CachedBackend`] in
/// front of it when `cache_ttl_ms` is set, and defaults the metrics sink to
/// a private [`PrometheusMetrics`] recorder.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    backend: Option<Arc<dyn Backend>>,
    metrics: Option<SharedMetrics>,
    clock: Option<SharedClock>,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("custom_backend", &self.backend.is_some())
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Configuration being built.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Use this backend instead of the configured one.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Report to this sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Use this time source.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// The backend the configuration selects.
    ///
    /// # Errors
    ///
    /// [`EngineError::Backend`] when demo mode is off and no URL is set, or
    /// the HTTP client cannot be built.
    pub fn configured_backend(config: &EngineConfig) -> Result<Arc<dyn Backend>, EngineError> {
        if config.demo_mode {
            info!(
                latency_ms = config.demo_latency_ms,
                jitter_ms = config.demo_latency_jitter_ms,
                failure_rate = config.demo_failure_rate,
                "Using simulated downstream"
            );
            return Ok(Arc::new(SimulatedBackend::new(
                Duration::from_millis(config.demo_latency_ms),
                Duration::from_millis(config.demo_latency_jitter_ms),
                config.demo_failure_rate,
            )));
        }
        match config.downstream_url.as_deref() {
            Some(url) if !url.is_empty() => {
                info!(url = url, "Using HTTP downstream");
                let backend = HttpBackend::connect(url, &config.http_pool())
                    .map_err(|e| EngineError::Backend(e.to_string()))?;
                Ok(Arc::new(backend))
            }
            _ => Err(EngineError::Backend(
                "downstream_url is required when demo_mode is off".into(),
            )),
        }
    }

    /// Validate and start. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Invalid configuration, backend selection failure, or an exporter
    /// setup error.
    pub fn build(self) -> Result<Engine, EngineError> {
        self.config.validate()?;
        let backend = match self.backend {
            Some(backend) => backend,
            None => Self::configured_backend(&self.config)?,
        };
        let metrics: SharedMetrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(PrometheusMetrics::new()?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let backend: Arc<dyn Backend> = match self.config.cache_ttl() {
            Some(ttl) => {
                info!(
                    ttl_ms = ttl.as_millis() as u64,
                    max_entries = self.config.cache_max_entries,
                    "Caching downstream results"
                );
                let cache = TtlCache::new(ttl, self.config.cache_max_entries, clock.clone());
                Arc::new(CachedBackend::new(backend, cache, metrics.clone()))
            }
            None => backend,
        };
        Engine::start_with_clock(self.config, backend, metrics, clock)
    }
}
