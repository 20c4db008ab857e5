//! Circuit breaker gating calls to the downstream dependency.
//!
//! ```text
//! ┌────────┐  failures >= threshold  ┌──────┐  cooldown elapsed  ┌──────────┐
//! │ Closed │ ──────────────────────► │ Open │ ─────────────────► │ HalfOpen │
//! └────────┘    within window        └──────┘                    └──────────┘
//!      ▲                                 ▲      trial failure         │
//!      │                                 └────────────────────────────┤
//!      │                  trial success                               │
//!      └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every decision and transition happens under one mutex. Metrics and logs
//! are emitted after the lock is released.
//!
//! Callers that run the dependency call themselves take a [`CallPermit`]
//! from [`CircuitBreaker::try_acquire`] and settle it with the result. A
//! permit that is dropped unsettled, because the call panicked or its task
//! was aborted, hands its half-open trial slot back.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::observability::metrics::{
    BREAKER_SHORT_CIRCUITS_TOTAL, BREAKER_STATE, BREAKER_TRANSITIONS_TOTAL,
};
use crate::observability::SharedMetrics;
use crate::util::SharedClock;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,

    /// Failure threshold exceeded - all calls rejected
    Open,

    /// Testing if the dependency recovered - limited calls allowed
    HalfOpen,
}

impl CircuitState {
    const ALL: [Self; 3] = [Self::Closed, Self::Open, Self::HalfOpen];

    /// Stable label used in metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failures within `window` that open the circuit
    pub failure_threshold: u32,

    /// Optional failure ratio (0, 1] that also opens the circuit once
    /// `min_samples` outcomes are in the window
    pub failure_rate: Option<f64>,

    /// Minimum outcomes in the window before `failure_rate` applies
    pub min_samples: u32,

    /// Rolling window for failure counting
    pub window: Duration,

    /// Time spent Open before trial calls are let through
    pub cooldown: Duration,

    /// Concurrent trial calls allowed while HalfOpen
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate: None,
            min_samples: 10,
            window: Duration::from_secs(10),
            cooldown: Duration::from_secs(5),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Set the failure count that opens the circuit
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Also open the circuit when the failure ratio reaches `rate`
    #[must_use]
    pub const fn with_failure_rate(mut self, rate: f64, min_samples: u32) -> Self {
        self.failure_rate = Some(rate);
        self.min_samples = min_samples;
        self
    }

    /// Set the rolling window
    #[must_use]
    pub const fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the cooldown
    #[must_use]
    pub const fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Set the number of concurrent half-open trial calls
    #[must_use]
    pub const fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerStats {
    /// Current state.
    pub state: CircuitState,
    /// Failures currently inside the rolling window.
    pub failures_in_window: usize,
    /// Outcomes currently inside the rolling window.
    pub samples_in_window: usize,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// (recorded at, failed)
    window: VecDeque<(Instant, bool)>,
    failures: usize,
    opened_at: Option<Instant>,
    trials_in_flight: u32,
    /// Bumped on every transition; ties a trial slot to one half-open period.
    epoch: u64,
}

impl Inner {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&(at, failed)) = self.window.front() {
            if now.saturating_duration_since(at) < window {
                break;
            }
            self.window.pop_front();
            if failed {
                self.failures -= 1;
            }
        }
    }

    fn push(&mut self, now: Instant, failed: bool) {
        self.window.push_back((now, failed));
        if failed {
            self.failures += 1;
        }
    }

    fn enter(&mut self, to: CircuitState, now: Instant) -> Transition {
        let from = self.state;
        self.state = to;
        self.trials_in_flight = 0;
        self.window.clear();
        self.failures = 0;
        self.opened_at = (to == CircuitState::Open).then_some(now);
        self.epoch = self.epoch.wrapping_add(1);
        Transition { from, to }
    }
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
}

/// Permission for one dependency call.
///
/// Settle it with [`succeeded`](Self::succeeded), [`failed`](Self::failed)
/// or [`ignored`](Self::ignored). Dropping it unsettled releases the
/// half-open trial slot it holds, if any, without recording an outcome.
#[must_use = "a permit should be settled with the call's result"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    /// Epoch of the half-open period whose trial slot this permit holds.
    trial: Option<u64>,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this call is a half-open trial.
    #[must_use]
    pub const fn is_trial(&self) -> bool {
        self.trial.is_some()
    }

    /// The call succeeded.
    pub fn succeeded(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    /// The call failed (timeout or transient error).
    pub fn failed(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }

    /// The call ended without saying anything about the dependency's health.
    pub fn ignored(mut self) {
        self.settled = true;
        self.breaker.release_trial(self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(trial = self.trial.is_some(), "Call permit dropped unsettled");
            self.breaker.release_trial(self.trial);
        }
    }
}

impl fmt::Debug for CallPermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("trial", &self.trial)
            .field("settled", &self.settled)
            .finish_non_exhaustive()
    }
}

/// Thread-safe circuit breaker.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: SharedClock,
    metrics: SharedMetrics,
    inner: Mutex<Inner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("inner", &*self.inner.lock())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a Closed breaker.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig, clock: SharedClock, metrics: SharedMetrics) -> Self {
        let breaker = Self {
            config,
            clock,
            metrics,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                failures: 0,
                opened_at: None,
                trials_in_flight: 0,
                epoch: 0,
            }),
        };
        breaker.publish_state(CircuitState::Closed);
        breaker
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask to make one call. `false` means fail fast without touching the
    /// dependency; that denial is counted as a short circuit, not a failure.
    ///
    /// An Open breaker whose cooldown has elapsed moves to HalfOpen here and
    /// the caller receives the first trial slot. The caller must report the
    /// result through `record_*`; prefer [`try_acquire`](Self::try_acquire).
    pub fn allow(&self) -> bool {
        self.admit().is_some()
    }

    /// Like [`allow`](Self::allow), but the answer is a permit that reports
    /// the result and frees its trial slot even if the call never returns.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        self.admit().map(|trial| CallPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    /// `None` when denied, otherwise the epoch of the trial slot taken (if
    /// the call is a half-open trial).
    fn admit(&self) -> Option<Option<u64>> {
        let now = self.clock.now();
        let (admitted, transition) = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => (Some(None), None),
                CircuitState::Open => {
                    if self.cooldown_elapsed(&inner, now) {
                        let t = inner.enter(CircuitState::HalfOpen, now);
                        inner.trials_in_flight = 1;
                        (Some(Some(inner.epoch)), Some(t))
                    } else {
                        (None, None)
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.trials_in_flight < self.config.half_open_max_calls {
                        inner.trials_in_flight += 1;
                        (Some(Some(inner.epoch)), None)
                    } else {
                        (None, None)
                    }
                }
            }
        };
        if let Some(t) = transition {
            self.announce(t);
        }
        if admitted.is_none() {
            self.metrics.incr_counter(BREAKER_SHORT_CIRCUITS_TOTAL, &[]);
        }
        admitted
    }

    /// Report a successful call.
    pub fn record_success(&self) {
        let now = self.clock.now();
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.prune(now, self.config.window);
                    inner.push(now, false);
                    None
                }
                CircuitState::HalfOpen => Some(inner.enter(CircuitState::Closed, now)),
                // A call admitted before the breaker opened; its result says
                // nothing about the current cooldown.
                CircuitState::Open => None,
            }
        };
        if let Some(t) = transition {
            self.announce(t);
        }
    }

    /// Report a failed call (timeout or transient error).
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.prune(now, self.config.window);
                    inner.push(now, true);
                    self.should_trip(&inner)
                        .then(|| inner.enter(CircuitState::Open, now))
                }
                CircuitState::HalfOpen => Some(inner.enter(CircuitState::Open, now)),
                CircuitState::Open => None,
            }
        };
        if let Some(t) = transition {
            self.announce(t);
        }
    }

    /// Report a call that ended without saying anything about the
    /// dependency's health (e.g. rejected input). Frees a half-open trial
    /// slot if one was held.
    pub fn record_ignored(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }

    /// Give back the trial slot taken in half-open period `trial`, if that
    /// period is still current.
    fn release_trial(&self, trial: Option<u64>) {
        let Some(epoch) = trial else {
            return;
        };
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.epoch == epoch {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }

    /// Current state. An Open breaker stays Open here until a caller's
    /// `allow` moves it to HalfOpen.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether calls would currently be refused outright: Open with the
    /// cooldown still running. Never changes state.
    #[must_use]
    pub fn is_open(&self) -> bool {
        let now = self.clock.now();
        let inner = self.inner.lock();
        inner.state == CircuitState::Open && !self.cooldown_elapsed(&inner, now)
    }

    /// Time left before an Open breaker admits a trial call.
    #[must_use]
    pub fn remaining_cooldown(&self) -> Duration {
        let now = self.clock.now();
        let inner = self.inner.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                (opened_at + self.config.cooldown).saturating_duration_since(now)
            }
            _ => Duration::ZERO,
        }
    }

    /// Snapshot for status reporting.
    #[must_use]
    pub fn stats(&self) -> BreakerStats {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.prune(now, self.config.window);
        BreakerStats {
            state: inner.state,
            failures_in_window: inner.failures,
            samples_in_window: inner.window.len(),
        }
    }

    fn cooldown_elapsed(&self, inner: &Inner, now: Instant) -> bool {
        inner
            .opened_at
            .is_none_or(|opened_at| now.saturating_duration_since(opened_at) >= self.config.cooldown)
    }

    #[allow(clippy::cast_precision_loss)]
    fn should_trip(&self, inner: &Inner) -> bool {
        if inner.failures >= self.config.failure_threshold as usize {
            return true;
        }
        match self.config.failure_rate {
            Some(rate) => {
                let samples = inner.window.len();
                samples >= self.config.min_samples as usize
                    && samples > 0
                    && inner.failures as f64 / samples as f64 >= rate
            }
            None => false,
        }
    }

    fn announce(&self, t: Transition) {
        match t.to {
            CircuitState::Open => warn!(
                from = %t.from,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "Circuit breaker opened"
            ),
            _ => info!(from = %t.from, to = %t.to, "Circuit breaker state changed"),
        }
        self.metrics.incr_counter(
            BREAKER_TRANSITIONS_TOTAL,
            &[("from", t.from.as_str()), ("to", t.to.as_str())],
        );
        self.publish_state(t.to);
    }

    fn publish_state(&self, current: CircuitState) {
        for state in CircuitState::ALL {
            let value = if state == current { 1.0 } else { 0.0 };
            self.metrics
                .set_gauge(BREAKER_STATE, value, &[("state", state.as_str())]);
        }
    }
}
