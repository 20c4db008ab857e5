//! Engine tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::admission::RetryAfterBounds;
use crate::infra::HttpPoolConfig;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

/// How `POST /jobs` answers by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// Acknowledge as soon as the job is queued.
    #[default]
    Enqueue,
    /// Hold the request until the job finishes or the request timeout elapses.
    Wait,
}

impl std::str::FromStr for AdmissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enqueue" | "async" => Ok(Self::Enqueue),
            "wait" | "sync" => Ok(Self::Wait),
            other => Err(format!("unknown admission mode `{other}`")),
        }
    }
}

/// Engine configuration. Durations are integer milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum queued jobs.
    pub queue_capacity: usize,
    /// Number of workers.
    pub pool_size: usize,
    /// Ceiling on admitted-but-unfinished jobs; `queue_capacity + pool_size`
    /// when unset.
    pub max_in_flight: Option<usize>,
    /// Default response mode.
    pub admission_mode: AdmissionMode,
    /// How long a waiting request holds out for its outcome.
    pub request_timeout_ms: u64,
    /// Retry-after floor.
    pub retry_after_min_ms: u64,
    /// Retry-after ceiling.
    pub retry_after_max_ms: u64,
    /// Total attempts per job, first call included.
    pub max_retry_attempts: u32,
    /// Backoff before the first retry.
    pub retry_base_delay_ms: u64,
    /// Backoff cap.
    pub retry_max_delay_ms: u64,
    /// Growth factor between retries.
    pub retry_multiplier: f64,
    /// Jitter as a fraction of the computed delay.
    pub retry_jitter: f64,
    /// Failures within the window that open the breaker.
    pub breaker_failure_threshold: u32,
    /// Optional failure ratio that also opens the breaker.
    pub breaker_failure_rate: Option<f64>,
    /// Samples required before the ratio applies.
    pub breaker_min_samples: u32,
    /// Rolling window.
    pub breaker_window_ms: u64,
    /// Time spent open before a trial call.
    pub breaker_cooldown_ms: u64,
    /// Concurrent trial calls allowed while half-open.
    pub breaker_half_open_max_calls: u32,
    /// Per-attempt timeout.
    pub call_timeout_ms: u64,
    /// How long shutdown waits for busy workers.
    pub shutdown_grace_ms: u64,
    /// Terminal results kept for lookup.
    pub result_retention: usize,
    /// Use the built-in simulator instead of a real dependency.
    pub demo_mode: bool,
    /// Simulator base latency.
    pub demo_latency_ms: u64,
    /// Simulator latency spread.
    pub demo_latency_jitter_ms: u64,
    /// Simulator transient failure probability.
    pub demo_failure_rate: f64,
    /// Real dependency endpoint.
    pub downstream_url: Option<String>,
    /// Endpoint checked by readiness; without one the invoke URL is
    /// checked with `HEAD` and any response counts as reachable.
    pub downstream_health_url: Option<String>,
    /// Idle connections kept per host by the HTTP backend's pool.
    pub downstream_pool_max_idle: usize,
    /// How long an idle pooled connection is kept.
    pub downstream_pool_idle_timeout_ms: u64,
    /// TCP connect timeout for new pooled connections.
    pub downstream_connect_timeout_ms: u64,
    /// Bound on a dependency health check.
    pub health_check_timeout_ms: u64,
    /// Lifetime of a cached downstream result; 0 disables the cache.
    pub cache_ttl_ms: u64,
    /// Most results the cache holds.
    pub cache_max_entries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            pool_size: num_cpus::get(),
            max_in_flight: None,
            admission_mode: AdmissionMode::Enqueue,
            request_timeout_ms: 5_000,
            retry_after_min_ms: 1_000,
            retry_after_max_ms: 30_000,
            max_retry_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2_000,
            retry_multiplier: 2.0,
            retry_jitter: 0.2,
            breaker_failure_threshold: 5,
            breaker_failure_rate: None,
            breaker_min_samples: 10,
            breaker_window_ms: 10_000,
            breaker_cooldown_ms: 5_000,
            breaker_half_open_max_calls: 1,
            call_timeout_ms: 2_000,
            shutdown_grace_ms: 10_000,
            result_retention: 10_000,
            demo_mode: true,
            demo_latency_ms: 200,
            demo_latency_jitter_ms: 400,
            demo_failure_rate: 0.2,
            downstream_url: None,
            downstream_health_url: None,
            downstream_pool_max_idle: 32,
            downstream_pool_idle_timeout_ms: 90_000,
            downstream_connect_timeout_ms: 1_000,
            health_check_timeout_ms: 1_000,
            cache_ttl_ms: 0,
            cache_max_entries: 10_000,
        }
    }
}

impl EngineConfig {
    /// Validate values, naming the first offending option.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] describing the problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.queue_capacity == 0 {
            return fail("queue_capacity must be greater than 0");
        }
        if self.pool_size == 0 {
            return fail("pool_size must be greater than 0");
        }
        if self.max_in_flight.is_some_and(|m| m < self.pool_size) {
            return fail("max_in_flight must be at least pool_size");
        }
        if self.request_timeout_ms == 0 {
            return fail("request_timeout_ms must be greater than 0");
        }
        if self.retry_after_min_ms > self.retry_after_max_ms {
            return fail("retry_after_min_ms must not exceed retry_after_max_ms");
        }
        if self.max_retry_attempts == 0 {
            return fail("max_retry_attempts must be greater than 0");
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return fail("retry_base_delay_ms must not exceed retry_max_delay_ms");
        }
        if self.retry_multiplier.is_nan() || self.retry_multiplier < 1.0 {
            return fail("retry_multiplier must be at least 1.0");
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return fail("retry_jitter must be within [0, 1]");
        }
        if self.breaker_failure_threshold == 0 {
            return fail("breaker_failure_threshold must be greater than 0");
        }
        if self
            .breaker_failure_rate
            .is_some_and(|r| !(r > 0.0 && r <= 1.0))
        {
            return fail("breaker_failure_rate must be within (0, 1]");
        }
        if self.breaker_window_ms == 0 {
            return fail("breaker_window_ms must be greater than 0");
        }
        if self.breaker_cooldown_ms == 0 {
            return fail("breaker_cooldown_ms must be greater than 0");
        }
        if self.breaker_half_open_max_calls == 0 {
            return fail("breaker_half_open_max_calls must be greater than 0");
        }
        if self.call_timeout_ms == 0 {
            return fail("call_timeout_ms must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.demo_failure_rate) {
            return fail("demo_failure_rate must be within [0, 1]");
        }
        if !self.demo_mode && self.downstream_url.as_deref().is_none_or(str::is_empty) {
            return fail("downstream_url is required when demo_mode is off");
        }
        if self.health_check_timeout_ms == 0 {
            return fail("health_check_timeout_ms must be greater than 0");
        }
        if self.cache_ttl_ms > 0 && self.cache_max_entries == 0 {
            return fail("cache_max_entries must be greater than 0 when the cache is on");
        }
        Ok(())
    }

    /// The in-flight ceiling actually enforced.
    #[must_use]
    pub fn effective_max_in_flight(&self) -> usize {
        self.max_in_flight
            .unwrap_or_else(|| self.queue_capacity.saturating_add(self.pool_size))
    }

    /// Wait-mode request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Per-attempt call timeout.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Dependency health check bound.
    #[must_use]
    pub const fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    /// Cached result lifetime, or `None` when caching is off.
    #[must_use]
    pub const fn cache_ttl(&self) -> Option<Duration> {
        if self.cache_ttl_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.cache_ttl_ms))
        }
    }

    /// Connection pool settings for the HTTP backend.
    #[must_use]
    pub fn http_pool(&self) -> HttpPoolConfig {
        HttpPoolConfig {
            max_idle_per_host: self.downstream_pool_max_idle,
            idle_timeout: Duration::from_millis(self.downstream_pool_idle_timeout_ms),
            connect_timeout: Duration::from_millis(self.downstream_connect_timeout_ms),
            health_url: self.downstream_health_url.clone(),
        }
    }

    /// Retry-after clamp.
    #[must_use]
    pub const fn retry_after_bounds(&self) -> RetryAfterBounds {
        RetryAfterBounds {
            min: Duration::from_millis(self.retry_after_min_ms),
            max: Duration::from_millis(self.retry_after_max_ms),
        }
    }

    /// Retry policy for the downstream client.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_retry_attempts)
            .with_delays(
                Duration::from_millis(self.retry_base_delay_ms),
                Duration::from_millis(self.retry_max_delay_ms),
            )
            .with_multiplier(self.retry_multiplier)
            .with_jitter(self.retry_jitter)
    }

    /// Circuit breaker settings.
    #[must_use]
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        let mut config = CircuitBreakerConfig::default()
            .with_failure_threshold(self.breaker_failure_threshold)
            .with_window(Duration::from_millis(self.breaker_window_ms))
            .with_cooldown(Duration::from_millis(self.breaker_cooldown_ms))
            .with_half_open_max_calls(self.breaker_half_open_max_calls);
        if let Some(rate) = self.breaker_failure_rate {
            config = config.with_failure_rate(rate, self.breaker_min_samples);
        }
        config
    }

    /// Apply `ENGINE_*` overrides (and the bare `DEMO_MODE`) read through
    /// `lookup`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Env`] when a variable is set to an unparsable value.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_with(&lookup, "ENGINE_QUEUE_CAPACITY", &mut self.queue_capacity)?;
        override_with(&lookup, "ENGINE_POOL_SIZE", &mut self.pool_size)?;
        if let Some(raw) = lookup("ENGINE_MAX_IN_FLIGHT") {
            self.max_in_flight = Some(parse_env("ENGINE_MAX_IN_FLIGHT", &raw)?);
        }
        if let Some(raw) = lookup("ENGINE_ADMISSION_MODE") {
            self.admission_mode = parse_env("ENGINE_ADMISSION_MODE", &raw)?;
        }
        override_with(&lookup, "ENGINE_REQUEST_TIMEOUT_MS", &mut self.request_timeout_ms)?;
        override_with(&lookup, "ENGINE_MAX_RETRY_ATTEMPTS", &mut self.max_retry_attempts)?;
        override_with(&lookup, "ENGINE_RETRY_BASE_DELAY_MS", &mut self.retry_base_delay_ms)?;
        override_with(&lookup, "ENGINE_RETRY_MAX_DELAY_MS", &mut self.retry_max_delay_ms)?;
        override_with(
            &lookup,
            "ENGINE_BREAKER_FAILURE_THRESHOLD",
            &mut self.breaker_failure_threshold,
        )?;
        override_with(&lookup, "ENGINE_BREAKER_WINDOW_MS", &mut self.breaker_window_ms)?;
        override_with(&lookup, "ENGINE_BREAKER_COOLDOWN_MS", &mut self.breaker_cooldown_ms)?;
        override_with(&lookup, "ENGINE_CALL_TIMEOUT_MS", &mut self.call_timeout_ms)?;
        override_with(&lookup, "ENGINE_DEMO_LATENCY_MS", &mut self.demo_latency_ms)?;
        override_with(&lookup, "ENGINE_DEMO_FAILURE_RATE", &mut self.demo_failure_rate)?;
        override_with(
            &lookup,
            "ENGINE_HEALTH_CHECK_TIMEOUT_MS",
            &mut self.health_check_timeout_ms,
        )?;
        override_with(&lookup, "ENGINE_CACHE_TTL_MS", &mut self.cache_ttl_ms)?;
        override_with(&lookup, "ENGINE_CACHE_MAX_ENTRIES", &mut self.cache_max_entries)?;
        override_with(
            &lookup,
            "ENGINE_DOWNSTREAM_POOL_MAX_IDLE",
            &mut self.downstream_pool_max_idle,
        )?;

        for key in ["DEMO_MODE", "ENGINE_DEMO_MODE"] {
            if let Some(raw) = lookup(key) {
                self.demo_mode = parse_bool(key, &raw)?;
            }
        }
        if let Some(url) = lookup("ENGINE_DOWNSTREAM_URL") {
            self.downstream_url = (!url.trim().is_empty()).then(|| url.trim().to_string());
        }
        if let Some(url) = lookup("ENGINE_DOWNSTREAM_HEALTH_URL") {
            self.downstream_health_url = (!url.trim().is_empty()).then(|| url.trim().to_string());
        }
        Ok(())
    }
}

fn override_with<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        *slot = parse_env(key, &raw)?;
    }
    Ok(())
}

pub(super) fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}
