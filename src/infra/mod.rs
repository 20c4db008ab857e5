//! Infrastructure adapters: queue buffer, result store, result cache, and downstream backends.

pub mod backend;
pub mod cache;
pub mod mailbox;
pub mod queue;

pub use backend::{CachedBackend, HttpBackend, HttpPoolConfig, SimulatedBackend};
pub use cache::{Lookup, TtlCache};
pub use mailbox::{ResultStore, WaitError};
pub use queue::InMemoryQueue;
