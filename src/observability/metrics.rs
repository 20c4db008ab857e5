//! Metrics sink abstraction and its backends.
//!
//! Engine components report through [`MetricsSink`] and never name a
//! backend. Three are provided:
//!
//! - [`PrometheusMetrics`]: records through `metrics-exporter-prometheus`,
//!   either into a private recorder (the default) or the global one.
//! - [`InMemoryMetrics`]: thread-safe store with query helpers for tests.
//!   It has no text rendering.
//! - [`NoopMetrics`]: discards everything.

use std::collections::BTreeMap;
use std::sync::Arc;

use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
use parking_lot::Mutex;

/// One `key=value` label pair.
pub type Label = (&'static str, &'static str);

/// Jobs accepted by admission.
pub const ACCEPTED_TOTAL: &str = "accepted_total";
/// Submissions rejected by admission, labeled by `reason`.
pub const REJECTED_TOTAL: &str = "rejected_total";
/// Jobs that reached a successful outcome.
pub const PROCESSED_SUCCESS_TOTAL: &str = "processed_success_total";
/// Jobs that reached a failed outcome, labeled by `reason`.
pub const PROCESSED_FAILURE_TOTAL: &str = "processed_failure_total";
/// Jobs abandoned at shutdown.
pub const ABANDONED_TOTAL: &str = "abandoned_total";
/// Retry attempts scheduled.
pub const RETRIES_TOTAL: &str = "retries_total";
/// Calls denied by the breaker without reaching the dependency.
pub const BREAKER_SHORT_CIRCUITS_TOTAL: &str = "breaker_short_circuits_total";
/// Breaker state changes, labeled by `from` and `to`.
pub const BREAKER_TRANSITIONS_TOTAL: &str = "breaker_transitions_total";
/// Jobs waiting in the queue.
pub const QUEUE_DEPTH: &str = "queue_depth";
/// Workers currently processing a job.
pub const WORKER_OCCUPANCY: &str = "worker_occupancy";
/// Admitted jobs that have not reached a terminal outcome.
pub const IN_FLIGHT: &str = "in_flight";
/// 1 for the breaker's current state, 0 for the others; labeled by `state`.
pub const BREAKER_STATE: &str = "breaker_state";
/// Dependency call latency in seconds, labeled by `result`.
pub const DOWNSTREAM_CALL_SECONDS: &str = "downstream_call_seconds";
/// Time from dequeue to terminal outcome in seconds, labeled by `outcome`.
pub const JOB_DURATION_SECONDS: &str = "job_duration_seconds";
/// Result cache lookups, labeled by `result` (`hit`, `miss`, `shared`).
pub const CACHE_LOOKUPS_TOTAL: &str = "cache_lookups_total";

/// Bucket bounds, in seconds, for every `*_seconds` histogram.
pub const LATENCY_BUCKETS: [f64; 12] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Receiver for counters, gauges, and histogram observations.
pub trait MetricsSink: Send + Sync + 'static {
    /// Set a gauge.
    fn set_gauge(&self, name: &'static str, value: f64, labels: &[Label]);

    /// Increment a counter by one.
    fn incr_counter(&self, name: &'static str, labels: &[Label]);

    /// Record one histogram observation.
    fn observe_histogram(&self, name: &'static str, value: f64, labels: &[Label]);

    /// Prometheus text exposition, when the backend can produce one.
    fn render(&self) -> Option<String> {
        None
    }
}

/// Shared sink handle.
pub type SharedMetrics = Arc<dyn MetricsSink>;

/// Sink that drops every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn set_gauge(&self, _name: &'static str, _value: f64, _labels: &[Label]) {}
    fn incr_counter(&self, _name: &'static str, _labels: &[Label]) {}
    fn observe_histogram(&self, _name: &'static str, _value: f64, _labels: &[Label]) {}
}

type SeriesKey = (&'static str, Vec<Label>);

fn series_key(name: &'static str, labels: &[Label]) -> SeriesKey {
    let mut labels = labels.to_vec();
    labels.sort_unstable();
    (name, labels)
}

#[derive(Debug, Default, Clone, Copy)]
struct Summary {
    count: u64,
    sum: f64,
}

#[derive(Debug, Default)]
struct Store {
    counters: BTreeMap<SeriesKey, u64>,
    gauges: BTreeMap<SeriesKey, f64>,
    histograms: BTreeMap<SeriesKey, Summary>,
}

/// In-process metrics store.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    store: Mutex<Store>,
}

impl InMemoryMetrics {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter series (0 if never incremented).
    #[must_use]
    pub fn counter(&self, name: &'static str, labels: &[Label]) -> u64 {
        self.store
            .lock()
            .counters
            .get(&series_key(name, labels))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of a counter across all label sets.
    #[must_use]
    pub fn counter_total(&self, name: &str) -> u64 {
        self.store
            .lock()
            .counters
            .iter()
            .filter(|((n, _), _)| *n == name)
            .map(|(_, v)| *v)
            .sum()
    }

    /// Current value of a gauge series.
    #[must_use]
    pub fn gauge(&self, name: &'static str, labels: &[Label]) -> Option<f64> {
        self.store.lock().gauges.get(&series_key(name, labels)).copied()
    }

    /// Number of observations recorded for a histogram series.
    #[must_use]
    pub fn histogram_count(&self, name: &'static str, labels: &[Label]) -> u64 {
        self.store
            .lock()
            .histograms
            .get(&series_key(name, labels))
            .map_or(0, |s| s.count)
    }

    /// Sum of the observations recorded for a histogram series.
    #[must_use]
    pub fn histogram_sum(&self, name: &'static str, labels: &[Label]) -> f64 {
        self.store
            .lock()
            .histograms
            .get(&series_key(name, labels))
            .map_or(0.0, |s| s.sum)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn set_gauge(&self, name: &'static str, value: f64, labels: &[Label]) {
        self.store.lock().gauges.insert(series_key(name, labels), value);
    }

    fn incr_counter(&self, name: &'static str, labels: &[Label]) {
        *self
            .store
            .lock()
            .counters
            .entry(series_key(name, labels))
            .or_default() += 1;
    }

    fn observe_histogram(&self, name: &'static str, value: f64, labels: &[Label]) {
        let mut store = self.store.lock();
        let summary = store.histograms.entry(series_key(name, labels)).or_default();
        summary.count += 1;
        summary.sum += value;
    }
}

enum Recording {
    /// A recorder owned by this sink; nothing global is touched.
    Local(PrometheusRecorder),
    /// Whatever recorder is installed globally.
    Global,
}

/// Sink backed by `metrics-exporter-prometheus`.
///
/// `*_seconds` histograms are exported with [`LATENCY_BUCKETS`].
pub struct PrometheusMetrics {
    recording: Recording,
    handle: PrometheusHandle,
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let recording = match self.recording {
            Recording::Local(_) => "local",
            Recording::Global => "global",
        };
        f.debug_struct("PrometheusMetrics")
            .field("recording", &recording)
            .finish_non_exhaustive()
    }
}

fn exporter() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Suffix("_seconds".to_string()), &LATENCY_BUCKETS)
}

impl PrometheusMetrics {
    /// Record into a private recorder. Engines built this way do not share
    /// series with each other or with the global recorder.
    ///
    /// # Errors
    ///
    /// Fails if the exporter rejects the bucket layout.
    pub fn new() -> Result<Self, BuildError> {
        let recorder = exporter()?.build_recorder();
        let handle = recorder.handle();
        Ok(Self {
            recording: Recording::Local(recorder),
            handle,
        })
    }

    /// Install the exporter as the global recorder, so metrics emitted
    /// anywhere in the process through the `metrics` macros are rendered too.
    ///
    /// # Errors
    ///
    /// Fails if a global recorder is already installed.
    pub fn install() -> Result<Self, BuildError> {
        let handle = exporter()?.install_recorder()?;
        Ok(Self {
            recording: Recording::Global,
            handle,
        })
    }

    fn record(&self, emit: impl FnOnce()) {
        match &self.recording {
            Recording::Local(recorder) => ::metrics::with_local_recorder(recorder, emit),
            Recording::Global => emit(),
        }
    }
}

fn to_labels(labels: &[Label]) -> Vec<::metrics::Label> {
    labels
        .iter()
        .map(|(k, v)| ::metrics::Label::new(*k, *v))
        .collect()
}

impl MetricsSink for PrometheusMetrics {
    fn set_gauge(&self, name: &'static str, value: f64, labels: &[Label]) {
        self.record(|| ::metrics::gauge!(name, to_labels(labels)).set(value));
    }

    fn incr_counter(&self, name: &'static str, labels: &[Label]) {
        self.record(|| ::metrics::counter!(name, to_labels(labels)).increment(1));
    }

    fn observe_histogram(&self, name: &'static str, value: f64, labels: &[Label]) {
        self.record(|| ::metrics::histogram!(name, to_labels(labels)).record(value));
    }

    fn render(&self) -> Option<String> {
        Some(self.handle.render())
    }
}
