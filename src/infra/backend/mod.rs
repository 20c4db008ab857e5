//! Downstream backends: the demo simulator, the HTTP client, and a result cache.

pub mod cached;
pub mod http;
pub mod simulated;

pub use cached::CachedBackend;
pub use http::{HttpBackend, HttpPoolConfig};
pub use simulated::SimulatedBackend;
