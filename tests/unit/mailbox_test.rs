//! Tests for the result store

use std::sync::Arc;
use std::time::Duration;

use backpressure_engine::core::{AbandonReason, JobId, JobOutcome, JobStatus};
use backpressure_engine::infra::{ResultStore, WaitError};
use serde_json::json;

fn done(n: i64) -> JobOutcome {
    JobOutcome::Succeeded { result: json!(n) }
}

#[test]
fn test_status_moves_from_queued_to_terminal() {
    let store = ResultStore::new(10);
    let id = JobId::new();

    store.create(id);
    assert_eq!(store.status(&id), Some(JobStatus::Queued));
    store.mark_running(&id);
    assert_eq!(store.status(&id), Some(JobStatus::Running));

    assert!(store.complete(&id, done(1)));
    assert_eq!(store.status(&id), Some(JobStatus::Finished(done(1))));
}

#[test]
fn test_outcome_is_recorded_once() {
    let store = ResultStore::new(10);
    let id = JobId::new();
    store.create(id);

    assert!(store.complete(&id, done(1)));
    assert!(!store.complete(&id, JobOutcome::Abandoned { reason: AbandonReason::Shutdown }));
    assert_eq!(store.status(&id), Some(JobStatus::Finished(done(1))));

    // Running never overwrites a terminal status.
    store.mark_running(&id);
    assert!(store.status(&id).unwrap().is_terminal());
}

#[test]
fn test_retention_evicts_oldest_terminal_only() {
    let store = ResultStore::new(2);
    let pending = JobId::new();
    store.create(pending);

    let ids: Vec<_> = (0..3).map(|_| JobId::new()).collect();
    for (n, id) in ids.iter().enumerate() {
        store.create(*id);
        store.complete(id, done(n as i64));
    }

    assert_eq!(store.status(&ids[0]), None);
    assert!(store.status(&ids[1]).is_some());
    assert!(store.status(&ids[2]).is_some());
    assert_eq!(store.status(&pending), Some(JobStatus::Queued));
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn test_wait_wakes_on_completion() {
    let store = Arc::new(ResultStore::new(10));
    let id = JobId::new();
    store.create(id);

    let waiter = {
        let store = store.clone();
        tokio::spawn(async move { store.wait(&id, Duration::from_secs(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.complete(&id, done(7));

    assert_eq!(waiter.await.unwrap(), Ok(done(7)));
}

#[tokio::test]
async fn test_wait_errors() {
    let store = ResultStore::new(10);
    assert_eq!(
        store.wait(&JobId::new(), Duration::from_millis(5)).await,
        Err(WaitError::NotFound)
    );

    let id = JobId::new();
    store.create(id);
    assert_eq!(
        store.wait(&id, Duration::from_millis(10)).await,
        Err(WaitError::TimedOut)
    );
}
