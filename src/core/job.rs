//! Job identity, priority, and submission model.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier minted for every submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Scheduling priority. Higher priorities dequeue first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Latency-sensitive work.
    High,
    /// Drains before everything else.
    Critical,
}

/// What a caller hands to admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Opaque structured payload forwarded to the downstream dependency.
    pub payload: Value,
    /// Optional priority; `None` means [`Priority::Normal`].
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Optional deadline, relative to submission.
    #[serde(default)]
    pub deadline: Option<Duration>,
}

impl JobSpec {
    /// Create a spec with default priority and no deadline.
    #[must_use]
    pub const fn new(payload: Value) -> Self {
        Self {
            payload,
            priority: None,
            deadline: None,
        }
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set a deadline relative to submission.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// An admitted unit of work.
#[derive(Debug, Clone)]
pub struct Job {
    /// Identifier.
    pub id: JobId,
    /// Payload.
    pub payload: Value,
    /// Effective priority.
    pub priority: Priority,
    /// When admission accepted the job.
    pub submitted_at: Instant,
    /// Absolute deadline, if any.
    pub deadline: Option<Instant>,
}

impl Job {
    /// Materialize a spec at `now` under a fresh identifier.
    #[must_use]
    pub fn from_spec(spec: JobSpec, now: Instant) -> Self {
        Self {
            id: JobId::new(),
            payload: spec.payload,
            priority: spec.priority.unwrap_or_default(),
            submitted_at: now,
            deadline: spec.deadline.map(|d| now + d),
        }
    }

    /// Whether the deadline has passed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}
