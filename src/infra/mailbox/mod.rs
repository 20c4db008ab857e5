//! Result storage backends.

pub mod memory;

pub use memory::{ResultStore, WaitError};
