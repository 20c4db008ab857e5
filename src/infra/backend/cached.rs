//! Result cache in front of another backend.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::core::downstream::{Backend, BackendError};
use crate::infra::cache::TtlCache;
use crate::observability::metrics::CACHE_LOOKUPS_TOTAL;
use crate::observability::SharedMetrics;

/// Serves repeated payloads from a [`TtlCache`].
///
/// The key is the payload's canonical JSON text. Identical payloads in
/// flight at the same time share one downstream call. Only successful
/// results are cached.
pub struct CachedBackend {
    inner: Arc<dyn Backend>,
    cache: TtlCache<Value>,
    metrics: SharedMetrics,
}

impl std::fmt::Debug for CachedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedBackend")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl CachedBackend {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Backend>, cache: TtlCache<Value>, metrics: SharedMetrics) -> Self {
        Self {
            inner,
            cache,
            metrics,
        }
    }

    /// The underlying cache.
    #[must_use]
    pub const fn cache(&self) -> &TtlCache<Value> {
        &self.cache
    }
}

#[async_trait]
impl Backend for CachedBackend {
    async fn invoke(&self, payload: &Value) -> Result<Value, BackendError> {
        let key = payload.to_string();
        let (result, lookup) = self
            .cache
            .get_or_try_load(&key, || self.inner.invoke(payload))
            .await;
        self.metrics
            .incr_counter(CACHE_LOOKUPS_TOTAL, &[("result", lookup.as_str())]);
        debug!(lookup = lookup.as_str(), "Result cache lookup");
        result
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        self.inner.health_check().await
    }

    async fn close(&self) {
        self.cache.clear();
        self.inner.close().await;
    }
}
