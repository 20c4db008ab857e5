//! Tests for API models

use backpressure_engine::core::{JobId, Priority, RejectReason, Rejection};
use backpressure_engine::runtime::api::{rejection_status, retry_after_header};
use backpressure_engine::runtime::{EnqueueAck, ErrorBody, SubmitRequest};
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;

#[test]
fn test_submit_request_defaults() {
    let req: SubmitRequest = serde_json::from_value(json!({"payload": {"n": 1}})).unwrap();
    let spec = req.to_spec();
    assert_eq!(spec.payload, json!({"n": 1}));
    assert_eq!(spec.priority, None);
    assert_eq!(spec.deadline, None);
    assert_eq!(req.wait, None);
}

#[test]
fn test_submit_request_with_options() {
    let req: SubmitRequest = serde_json::from_value(json!({
        "payload": "x",
        "priority": "critical",
        "deadline_ms": 250,
        "wait": true
    }))
    .unwrap();
    let spec = req.to_spec();
    assert_eq!(spec.priority, Some(Priority::Critical));
    assert_eq!(spec.deadline, Some(Duration::from_millis(250)));
    assert_eq!(req.wait, Some(true));
}

#[test]
fn test_enqueue_ack_shape() {
    let id = JobId::new();
    let ack = serde_json::to_value(EnqueueAck::new(id, 3, 10)).unwrap();
    assert_eq!(ack["id"], id.to_string());
    assert_eq!(ack["status"], "accepted");
    assert_eq!(ack["queue_depth"], 3);
    assert_eq!(ack["queue_capacity"], 10);
}

#[test]
fn test_rejection_status_codes() {
    assert_eq!(rejection_status(RejectReason::QueueFull), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(rejection_status(RejectReason::Overloaded), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(rejection_status(RejectReason::BreakerOpen), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(rejection_status(RejectReason::ShuttingDown), StatusCode::SERVICE_UNAVAILABLE);
}

#[test]
fn test_shutdown_rejection_has_no_retry_after() {
    let shutting_down = Rejection {
        reason: RejectReason::ShuttingDown,
        retry_after: Duration::from_secs(5),
    };
    assert_eq!(retry_after_header(&shutting_down), None);
    let body = serde_json::to_value(ErrorBody::rejected(&shutting_down)).unwrap();
    assert_eq!(body, json!({"error": "shutting_down"}));

    let full = Rejection {
        reason: RejectReason::QueueFull,
        retry_after: Duration::from_millis(2_500),
    };
    assert_eq!(retry_after_header(&full), Some(3));
}
