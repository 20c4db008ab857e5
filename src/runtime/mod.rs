//! API surface: request/response models and the HTTP server.

pub mod api;
pub mod http;

pub use api::{EnqueueAck, ErrorBody, Health, JobStatusResponse, Readiness, SubmitRequest};
pub use http::{router, run, serve, AppState};
