//! Tests for error types

use backpressure_engine::config::ConfigError;
use backpressure_engine::core::{CallError, EngineError, FailureReason, JobId, JobOutcome, RejectReason};

#[test]
fn test_metrics_error_wraps_exporter_error() {
    let err = EngineError::from(metrics_exporter_prometheus::BuildError::EmptyBucketsOrQuantiles);
    assert_eq!(
        format!("{}", err),
        "metrics exporter: bucket bounds/quantiles cannot be empty"
    );
}

#[test]
fn test_job_not_found_error() {
    let id: JobId = "6f1c1e2a-3b4d-4c5e-8f70-9a8b7c6d5e4f".parse().unwrap();
    let err = EngineError::JobNotFound(id);
    assert_eq!(
        format!("{}", err),
        "job 6f1c1e2a-3b4d-4c5e-8f70-9a8b7c6d5e4f not found"
    );
}

#[test]
fn test_env_error_names_the_variable() {
    let err = ConfigError::Env {
        key: "ENGINE_POOL_SIZE".to_string(),
        value: "many".to_string(),
    };
    assert_eq!(format!("{}", err), "invalid value \"many\" for ENGINE_POOL_SIZE");
}

#[test]
fn test_call_errors_map_to_outcomes() {
    assert_eq!(
        JobOutcome::from(CallError::BreakerOpen),
        JobOutcome::Rejected { reason: RejectReason::BreakerOpen }
    );
    assert_eq!(
        JobOutcome::from(CallError::DeadlineExceeded { attempts: 2 }),
        JobOutcome::Failed(FailureReason::DeadlineExceeded)
    );
    assert_eq!(
        format!(
            "{}",
            CallError::RetriesExhausted { attempts: 3, last_error: "503".to_string() }
        ),
        "retries exhausted after 3 attempts: 503"
    );
}
