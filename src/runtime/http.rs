//! HTTP surface over the engine (axum).
//!
//! | Route | Purpose |
//! |---|---|
//! | `POST /jobs` | admit a job (`202` ack, `200` outcome in wait mode, `429`/`503` with `Retry-After`) |
//! | `GET /jobs/{id}` | job status, `404` if unknown or evicted |
//! | `GET /metrics` | Prometheus text |
//! | `GET /health` | liveness with queue depth |
//! | `GET /ready` | readiness, `503` once shutdown begins or the downstream is unhealthy |

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tracing::{debug, info};

use super::api::{
    rejection_status, retry_after_header, EnqueueAck, ErrorBody, Health, JobStatusResponse,
    Readiness, SubmitRequest,
};
use crate::config::AdmissionMode;
use crate::core::{Engine, EngineError, JobId, Rejection, ShutdownReport, SubmitResponse};

/// Shared handler state.
#[derive(Clone, Debug)]
pub struct AppState {
    /// The engine behind every route.
    pub engine: Arc<Engine>,
}

/// Build the router.
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/{id}", get(get_job))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(AppState { engine })
}

/// Serve until `shutdown` resolves. In-flight requests finish first; the
/// engine itself is not shut down here.
///
/// # Errors
///
/// I/O errors from the listener.
pub async fn serve<F>(listener: TcpListener, engine: Arc<Engine>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(address = %addr, "HTTP server starting");
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

/// Serve, then shut everything down in order once `signal` resolves.
///
/// The engine stops admitting first so `/ready` answers `503` while the
/// listener stays open for `drain_delay`, letting load balancers notice.
/// Then the listener closes, open requests finish, and the engine drains.
///
/// # Errors
///
/// I/O errors from the listener.
pub async fn run<F>(
    listener: TcpListener,
    engine: Arc<Engine>,
    signal: F,
    drain_delay: Duration,
) -> std::io::Result<ShutdownReport>
where
    F: Future<Output = ()> + Send + 'static,
{
    let draining = engine.clone();
    let shutdown = async move {
        signal.await;
        draining.begin_shutdown();
        if !drain_delay.is_zero() {
            info!(
                drain_delay_ms = drain_delay.as_millis() as u64,
                "Not ready, holding listener open"
            );
            tokio::time::sleep(drain_delay).await;
        }
    };
    serve(listener, engine.clone(), shutdown).await?;
    Ok(engine.shutdown().await)
}

fn rejection_response(rejection: &Rejection) -> Response {
    let mut response = (
        rejection_status(rejection.reason),
        Json(ErrorBody::rejected(rejection)),
    )
        .into_response();
    if let Some(secs) = retry_after_header(rejection) {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

async fn submit_job(State(state): State<AppState>, Json(req): Json<SubmitRequest>) -> Response {
    let engine = &state.engine;
    let wait = req
        .wait
        .unwrap_or(engine.config().admission_mode == AdmissionMode::Wait);
    let spec = req.to_spec();

    let answer = if wait {
        engine.submit_and_wait(spec).await
    } else {
        engine.enqueue(spec)
    };
    match answer {
        SubmitResponse::Enqueued {
            id,
            queue_depth,
            queue_capacity,
        } => (
            StatusCode::ACCEPTED,
            Json(EnqueueAck::new(id, queue_depth, queue_capacity)),
        )
            .into_response(),
        SubmitResponse::Completed { id, outcome } => {
            (StatusCode::OK, Json(JobStatusResponse::finished(id, outcome))).into_response()
        }
        SubmitResponse::Rejected(rejection) => rejection_response(&rejection),
    }
}

async fn get_job(State(state): State<AppState>, Path(raw): Path<String>) -> Response {
    let Ok(id) = raw.parse::<JobId>() else {
        debug!(id = %raw, "Malformed job id");
        return (StatusCode::BAD_REQUEST, Json(ErrorBody::plain("invalid_job_id"))).into_response();
    };
    match state.engine.status(id) {
        Ok(status) => (StatusCode::OK, Json(JobStatusResponse { id, status })).into_response(),
        Err(EngineError::JobNotFound(_)) => {
            (StatusCode::NOT_FOUND, Json(ErrorBody::plain("not_found"))).into_response()
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody::plain(err.to_string())),
        )
            .into_response(),
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    let body = state.engine.metrics().render().unwrap_or_default();
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        body,
    )
        .into_response()
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    let stats = state.engine.stats();
    Json(Health {
        status: "ok".to_string(),
        uptime_secs: stats.uptime_secs,
        queue_depth: stats.queue_depth,
        queue_capacity: stats.queue_capacity,
    })
}

async fn ready(State(state): State<AppState>) -> Response {
    let accepting = state.engine.is_ready();
    let dependency = state.engine.check_dependency().await;
    let readiness = Readiness::new(accepting, dependency);
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness)).into_response()
}
