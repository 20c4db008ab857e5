//! Observability: the metrics sink interface and its backends.

pub mod metrics;

pub use self::metrics::{InMemoryMetrics, Label, MetricsSink, NoopMetrics, PrometheusMetrics, SharedMetrics};
