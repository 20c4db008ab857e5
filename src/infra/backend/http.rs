//! Real dependency reached over HTTP.
//!
//! The `reqwest` client owns a keep-alive connection pool. It is built once
//! from [`HttpPoolConfig`], checked by readiness, and closed when the
//! engine shuts down; calls after `close` fail without touching the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info};

use crate::core::downstream::{Backend, BackendError};

/// Connection pool settings for [`HttpBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpPoolConfig {
    /// Idle connections kept per host.
    pub max_idle_per_host: usize,
    /// How long an idle connection is kept.
    pub idle_timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Health endpoint; `None` sends `HEAD` to the invoke URL.
    pub health_url: Option<String>,
}

impl Default for HttpPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 32,
            idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(1),
            health_url: None,
        }
    }
}

/// POSTs each payload as JSON to a fixed URL.
///
/// 2xx bodies are parsed as JSON (an empty body becomes `null`). 408, 429,
/// 5xx and transport errors are transient; any other status is invalid input.
#[derive(Debug)]
pub struct HttpBackend {
    client: Client,
    url: String,
    health_url: Option<String>,
    closed: AtomicBool,
}

impl HttpBackend {
    /// Create a backend for `url` with default pool settings.
    ///
    /// # Errors
    ///
    /// The HTTP client could not be built (TLS backend initialisation).
    pub fn new(url: impl Into<String>) -> Result<Self, BackendError> {
        Self::connect(url, &HttpPoolConfig::default())
    }

    /// Build the pooled client for `url`.
    ///
    /// # Errors
    ///
    /// The HTTP client could not be built (TLS backend initialisation).
    pub fn connect(url: impl Into<String>, pool: &HttpPoolConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .pool_max_idle_per_host(pool.max_idle_per_host)
            .pool_idle_timeout(pool.idle_timeout)
            .connect_timeout(pool.connect_timeout)
            .build()
            .map_err(|e| BackendError::Transient(format!("building HTTP client: {e}")))?;
        let backend = Self::with_client(client, url);
        info!(
            url = %backend.url,
            max_idle_per_host = pool.max_idle_per_host,
            "HTTP connection pool ready"
        );
        Ok(Self {
            health_url: pool.health_url.clone(),
            ..backend
        })
    }

    /// Create a backend with a preconfigured client.
    #[must_use]
    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            health_url: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether [`close`](Backend::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.is_closed() {
            return Err(BackendError::Transient("HTTP backend is closed".into()));
        }
        Ok(())
    }
}

fn classify(status: StatusCode, body: String) -> BackendError {
    let message = format!("downstream returned {status}: {body}");
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        BackendError::Transient(message)
    } else {
        BackendError::Invalid(message)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn invoke(&self, payload: &Value) -> Result<Value, BackendError> {
        self.ensure_open()?;
        let resp = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        debug!(url = %self.url, status = status.as_u16(), "Downstream responded");

        if !status.is_success() {
            return Err(classify(status, text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| BackendError::Invalid(format!("downstream body is not JSON: {e}")))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        self.ensure_open()?;
        let transport = |e: reqwest::Error| BackendError::Transient(e.to_string());
        match &self.health_url {
            Some(url) => {
                let status = self.client.get(url).send().await.map_err(transport)?.status();
                if status.is_success() {
                    Ok(())
                } else {
                    Err(BackendError::Transient(format!("health endpoint returned {status}")))
                }
            }
            // Any answer proves a pooled connection can be made.
            None => self
                .client
                .head(&self.url)
                .send()
                .await
                .map(drop)
                .map_err(transport),
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(url = %self.url, "HTTP connection pool closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(classify(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_retryable());
        assert!(classify(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert!(classify(StatusCode::REQUEST_TIMEOUT, String::new()).is_retryable());
        assert!(!classify(StatusCode::BAD_REQUEST, String::new()).is_retryable());
        assert!(!classify(StatusCode::NOT_FOUND, String::new()).is_retryable());
    }

    #[tokio::test]
    async fn connection_errors_are_transient() {
        // Port 9 (discard) on loopback is not expected to be listening.
        let backend = HttpBackend::new("http://127.0.0.1:9/invoke").unwrap();
        let err = backend.invoke(&serde_json::json!({})).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(backend.health_check().await.is_err());
    }

    #[tokio::test]
    async fn closed_backend_refuses_calls() {
        let pool = HttpPoolConfig {
            health_url: Some("http://127.0.0.1:9/health".into()),
            ..HttpPoolConfig::default()
        };
        let backend = HttpBackend::connect("http://127.0.0.1:9/invoke", &pool).unwrap();
        backend.close().await;
        backend.close().await;
        assert!(backend.is_closed());
        assert_eq!(
            backend.invoke(&serde_json::json!({})).await,
            Err(BackendError::Transient("HTTP backend is closed".into()))
        );
        assert!(backend.health_check().await.is_err());
    }
}
