//! Integration tests for admission control and backpressure
//!
//! These tests validate:
//! - Queue-full rejection with a retry-after hint
//! - The in-flight ceiling (`Overloaded`)
//! - Breaker-open and shutdown rejections
//! - Concurrent submitters never overfilling the queue
//! - Wait-mode submissions, including request timeouts
//! - Deadline eviction and priority ordering

mod common;

use std::sync::Arc;
use std::time::Duration;

use backpressure_engine::config::{AdmissionMode, EngineConfig};
use backpressure_engine::core::{
    FailureReason, JobOutcome, JobSpec, JobStatus, Priority, RejectReason, SubmitResponse,
};
use backpressure_engine::observability::metrics::{ACCEPTED_TOTAL, REJECTED_TOTAL};
use common::{eventually, outcome_of, start_engine, test_config, FlakyBackend, GateBackend};
use serde_json::json;

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn test_queue_full_rejects_with_retry_after() {
    let backend = GateBackend::new();
    let (engine, metrics) = start_engine(test_config(2, 1), backend.clone());

    let first = engine.enqueue(JobSpec::new(json!({"n": 0})));
    assert!(matches!(first, SubmitResponse::Enqueued { .. }));
    eventually(|| backend.started() == 1).await;

    let answers: Vec<_> = (1..=3)
        .map(|n| engine.enqueue(JobSpec::new(json!({ "n": n }))))
        .collect();

    let accepted: Vec<_> = answers
        .iter()
        .filter_map(|a| match a {
            SubmitResponse::Enqueued { id, queue_capacity, .. } => {
                assert_eq!(*queue_capacity, 2);
                Some(*id)
            }
            _ => None,
        })
        .collect();
    assert_eq!(accepted.len(), 2);

    match &answers[2] {
        SubmitResponse::Rejected(rejection) => {
            assert_eq!(rejection.reason, RejectReason::QueueFull);
            assert!(rejection.retry_after >= Duration::from_secs(1));
            assert!(rejection.retry_after_secs() >= 1);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(engine.stats().queue_depth, 2);

    backend.open();
    for id in accepted {
        assert!(outcome_of(&engine, id).await.is_success());
    }
    assert_eq!(metrics.counter(ACCEPTED_TOTAL, &[]), 3);
    assert_eq!(metrics.counter(REJECTED_TOTAL, &[("reason", "queue_full")]), 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_in_flight_ceiling_rejects_as_overloaded() {
    let backend = GateBackend::new();
    let config = EngineConfig {
        max_in_flight: Some(2),
        ..test_config(10, 1)
    };
    let (engine, _) = start_engine(config, backend.clone());

    engine.enqueue(JobSpec::new(json!(1)));
    eventually(|| backend.started() == 1).await;
    assert!(matches!(engine.enqueue(JobSpec::new(json!(2))), SubmitResponse::Enqueued { .. }));

    match engine.enqueue(JobSpec::new(json!(3))) {
        SubmitResponse::Rejected(r) => assert_eq!(r.reason, RejectReason::Overloaded),
        other => panic!("expected overload, got {other:?}"),
    }
    assert_eq!(engine.stats().in_flight, 2);

    backend.open();
    eventually(|| engine.stats().in_flight == 0).await;
    assert!(matches!(engine.enqueue(JobSpec::new(json!(4))), SubmitResponse::Enqueued { .. }));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_open_breaker_rejects_at_admission() {
    let backend = FlakyBackend::failing();
    let config = EngineConfig {
        breaker_failure_threshold: 1,
        max_retry_attempts: 1,
        breaker_cooldown_ms: 60_000,
        ..test_config(10, 1)
    };
    let (engine, metrics) = start_engine(config, backend.clone());

    let SubmitResponse::Enqueued { id, .. } = engine.enqueue(JobSpec::new(json!(1))) else {
        panic!("first job should be accepted");
    };
    assert!(matches!(
        outcome_of(&engine, id).await,
        JobOutcome::Failed(FailureReason::RetriesExhausted { attempts: 1, .. })
    ));

    match engine.enqueue(JobSpec::new(json!(2))) {
        SubmitResponse::Rejected(r) => {
            assert_eq!(r.reason, RejectReason::BreakerOpen);
            assert!(r.retry_after > Duration::ZERO);
            assert!(r.retry_after <= Duration::from_secs(60));
        }
        other => panic!("expected breaker rejection, got {other:?}"),
    }
    assert_eq!(backend.calls(), 1);
    assert_eq!(metrics.counter(REJECTED_TOTAL, &[("reason", "breaker_open")]), 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_admission() {
    let (engine, _) = start_engine(test_config(4, 1), FlakyBackend::healthy());
    assert!(engine.is_ready());

    engine.shutdown().await;
    assert!(!engine.is_ready());
    match engine.enqueue(JobSpec::new(json!(1))) {
        SubmitResponse::Rejected(r) => assert_eq!(r.reason, RejectReason::ShuttingDown),
        other => panic!("expected shutdown rejection, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submitters_respect_capacity() {
    let backend = GateBackend::new();
    let (engine, _) = start_engine(test_config(5, 1), backend.clone());

    let submitters: Vec<_> = (0..50)
        .map(|n| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.enqueue(JobSpec::new(json!({ "n": n }))) })
        })
        .collect();
    let answers: Vec<_> = futures::future::join_all(submitters)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let accepted = answers
        .iter()
        .filter(|a| matches!(a, SubmitResponse::Enqueued { .. }))
        .count();
    // Capacity plus the one job a worker may already have claimed.
    assert!((5..=6).contains(&accepted), "accepted {accepted}");
    assert!(engine.stats().queue_depth <= 5);
    // A submitter that holds an in-flight slot but has not inserted yet can
    // make a concurrent one see `Overloaded` instead of `QueueFull`.
    assert!(answers.iter().all(|a| match a {
        SubmitResponse::Rejected(r) => {
            matches!(r.reason, RejectReason::QueueFull | RejectReason::Overloaded)
        }
        _ => true,
    }));

    backend.open();
    engine.shutdown().await;
}

#[tokio::test]
async fn test_identical_payloads_get_distinct_ids() {
    let (engine, _) = start_engine(test_config(10, 1), GateBackend::new());
    let ids: Vec<_> = (0..3)
        .filter_map(|_| match engine.enqueue(JobSpec::new(json!({"same": true}))) {
            SubmitResponse::Enqueued { id, .. } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(ids.len(), 3);
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_wait_mode_returns_outcome() {
    let config = EngineConfig {
        admission_mode: AdmissionMode::Wait,
        ..test_config(4, 2)
    };
    let (engine, _) = start_engine(config, FlakyBackend::healthy());

    match engine.submit(JobSpec::new(json!({"order": 7}))).await {
        SubmitResponse::Completed { outcome, .. } => {
            assert_eq!(outcome, JobOutcome::Succeeded { result: json!({"order": 7}) });
        }
        other => panic!("expected completion, got {other:?}"),
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn test_wait_mode_times_out_but_job_continues() {
    let backend = GateBackend::new();
    let config = EngineConfig {
        request_timeout_ms: 50,
        ..test_config(4, 1)
    };
    let (engine, _) = start_engine(config, backend.clone());

    let SubmitResponse::Completed { id, outcome } = engine.submit_and_wait(JobSpec::new(json!(1))).await
    else {
        panic!("wait mode should complete");
    };
    assert_eq!(outcome, JobOutcome::Failed(FailureReason::Timeout));
    assert_eq!(engine.status(id).unwrap(), JobStatus::Running);

    backend.open();
    assert!(outcome_of(&engine, id).await.is_success());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_expired_jobs_are_evicted_to_make_room() {
    let backend = GateBackend::new();
    let config = EngineConfig {
        max_in_flight: Some(10),
        ..test_config(1, 1)
    };
    let (engine, _) = start_engine(config, backend.clone());

    engine.enqueue(JobSpec::new(json!("running")));
    eventually(|| backend.started() == 1).await;

    let SubmitResponse::Enqueued { id: stale, .. } =
        engine.enqueue(JobSpec::new(json!("stale")).with_deadline(Duration::from_millis(10)))
    else {
        panic!("stale job should be queued");
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(matches!(
        engine.enqueue(JobSpec::new(json!("fresh"))),
        SubmitResponse::Enqueued { .. }
    ));
    assert_eq!(
        engine.status(stale).unwrap(),
        JobStatus::Finished(JobOutcome::Failed(FailureReason::DeadlineExceeded))
    );

    backend.open();
    engine.shutdown().await;
}

#[tokio::test]
async fn test_higher_priority_runs_first() {
    let backend = GateBackend::new();
    let (engine, _) = start_engine(test_config(10, 1), backend.clone());

    engine.enqueue(JobSpec::new(json!("head")));
    eventually(|| backend.started() == 1).await;

    let mut ids = Vec::new();
    for (name, priority) in [
        ("low", Priority::Low),
        ("normal", Priority::Normal),
        ("critical", Priority::Critical),
    ] {
        if let SubmitResponse::Enqueued { id, .. } =
            engine.enqueue(JobSpec::new(json!(name)).with_priority(priority))
        {
            ids.push(id);
        }
    }
    backend.open();
    for id in ids {
        outcome_of(&engine, id).await;
    }

    assert_eq!(
        backend.seen(),
        vec![json!("head"), json!("critical"), json!("normal"), json!("low")]
    );
    engine.shutdown().await;
}
