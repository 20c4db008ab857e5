//! In-memory result store.
//!
//! One slot per admitted job, created at admission and updated as the job
//! moves through the pool. Each slot is a `tokio::sync::watch` channel, so
//! any number of callers can wait for the terminal outcome without polling.
//! Terminal slots are retained for lookup up to a fixed count, oldest
//! evicted first; slots of unfinished jobs are never evicted.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::core::job::JobId;
use crate::core::outcome::{JobOutcome, JobStatus};

/// Why waiting for an outcome ended without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// No slot for the job (never admitted or already evicted).
    #[error("job not found")]
    NotFound,
    /// The timeout elapsed first.
    #[error("timed out waiting for job outcome")]
    TimedOut,
}

#[derive(Default)]
struct Slots {
    entries: HashMap<JobId, watch::Sender<JobStatus>>,
    finished: VecDeque<JobId>,
}

/// Job status slots with async waiting.
pub struct ResultStore {
    retention: usize,
    slots: RwLock<Slots>,
}

impl std::fmt::Debug for ResultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStore")
            .field("retention", &self.retention)
            .field("slots", &self.len())
            .finish()
    }
}

impl ResultStore {
    /// Create a store keeping at most `retention` terminal results.
    #[must_use]
    pub fn new(retention: usize) -> Self {
        Self {
            retention,
            slots: RwLock::new(Slots::default()),
        }
    }

    /// Open a slot in `Queued`.
    pub fn create(&self, id: JobId) {
        let (tx, _rx) = watch::channel(JobStatus::Queued);
        self.slots.write().entries.insert(id, tx);
    }

    /// Drop a slot outright (admission rolled back).
    pub fn remove(&self, id: &JobId) {
        self.slots.write().entries.remove(id);
    }

    /// Move a queued job to `Running`.
    pub fn mark_running(&self, id: &JobId) {
        if let Some(tx) = self.slots.read().entries.get(id) {
            tx.send_if_modified(|status| {
                if *status == JobStatus::Queued {
                    *status = JobStatus::Running;
                    true
                } else {
                    false
                }
            });
        }
    }

    /// Record the terminal outcome and wake every waiter.
    ///
    /// Returns `false` if the slot is unknown or already terminal; an
    /// outcome is recorded at most once.
    pub fn complete(&self, id: &JobId, outcome: JobOutcome) -> bool {
        let mut slots = self.slots.write();
        let Some(tx) = slots.entries.get(id) else {
            return false;
        };
        let recorded = tx.send_if_modified(|status| {
            if status.is_terminal() {
                false
            } else {
                *status = JobStatus::Finished(outcome);
                true
            }
        });
        if recorded {
            slots.finished.push_back(*id);
            while slots.finished.len() > self.retention {
                if let Some(oldest) = slots.finished.pop_front() {
                    slots.entries.remove(&oldest);
                }
            }
        }
        recorded
    }

    /// Current status.
    #[must_use]
    pub fn status(&self, id: &JobId) -> Option<JobStatus> {
        self.slots
            .read()
            .entries
            .get(id)
            .map(|tx| tx.borrow().clone())
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn subscribe(&self, id: &JobId) -> Option<watch::Receiver<JobStatus>> {
        self.slots.read().entries.get(id).map(watch::Sender::subscribe)
    }

    /// Wait up to `timeout` for the terminal outcome.
    ///
    /// # Errors
    ///
    /// [`WaitError::NotFound`] for an unknown job, [`WaitError::TimedOut`]
    /// if the outcome did not arrive in time.
    pub async fn wait(&self, id: &JobId, timeout: Duration) -> Result<JobOutcome, WaitError> {
        let mut rx = self.subscribe(id).ok_or(WaitError::NotFound)?;
        let waited = tokio::time::timeout(timeout, async move {
            rx.wait_for(JobStatus::is_terminal)
                .await
                .ok()
                .and_then(|status| status.outcome().cloned())
        })
        .await;
        match waited {
            Ok(Some(outcome)) => Ok(outcome),
            Ok(None) => Err(WaitError::NotFound),
            Err(_) => Err(WaitError::TimedOut),
        }
    }

    /// Slots held (queued, running, and retained terminal).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().entries.len()
    }

    /// Whether no slots are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
