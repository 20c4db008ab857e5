//! Bounded, concurrent job queue shared by admission and the worker pool.
//!
//! # Design
//!
//! - **Fixed capacity**: `try_enqueue` fails immediately when full; the
//!   queue never grows and never blocks a producer.
//! - **No polling**: consumers park on a `tokio::sync::Notify` and are woken
//!   by producers or by `close_and_drain`.
//! - **Cancel-safe**: dropping a `dequeue` future never loses a job; the job
//!   is removed and returned in the same poll.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::error::Elapsed;

use super::job::Job;
use crate::infra::queue::InMemoryQueue;

/// Why a job could not be enqueued. Ownership of the job is handed back.
#[derive(Debug)]
pub enum EnqueueError {
    /// The queue is at capacity.
    Full(Job),
    /// The queue has been closed for shutdown.
    Closed(Job),
}

impl EnqueueError {
    /// Recover the job.
    #[must_use]
    pub fn into_job(self) -> Job {
        match self {
            Self::Full(job) | Self::Closed(job) => job,
        }
    }
}

struct State {
    buffer: InMemoryQueue,
    closed: bool,
}

/// Fixed-capacity priority queue with async dequeue.
pub struct BoundedQueue {
    state: Mutex<State>,
    notify: Notify,
    capacity: usize,
}

impl std::fmt::Debug for BoundedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("len", &state.buffer.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl BoundedQueue {
    /// Create an open, empty queue.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                buffer: InMemoryQueue::new(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Insert without blocking. Returns the depth after insertion.
    ///
    /// # Errors
    ///
    /// [`EnqueueError::Full`] at capacity, [`EnqueueError::Closed`] after
    /// `close_and_drain`. Both hand the job back.
    pub fn try_enqueue(&self, job: Job) -> Result<usize, EnqueueError> {
        let depth = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(EnqueueError::Closed(job));
            }
            state.buffer.push(job).map_err(EnqueueError::Full)?;
            state.buffer.len()
        };
        self.notify.notify_one();
        Ok(depth)
    }

    /// Boolean form of [`try_enqueue`](Self::try_enqueue): `false` if the
    /// job was refused (and dropped).
    pub fn enqueue(&self, job: Job) -> bool {
        self.try_enqueue(job).is_ok()
    }

    /// Wait for the next job. Returns `None` once the queue is closed.
    pub async fn dequeue(&self) -> Option<Job> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking so a push between the check
            // and the await still wakes us.
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if let Some(job) = state.buffer.pop() {
                    let more = !state.buffer.is_empty();
                    drop(state);
                    if more {
                        // Pass the baton: permits from notify_one don't stack.
                        self.notify.notify_one();
                    }
                    return Some(job);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// [`dequeue`](Self::dequeue) bounded by `timeout`. `Ok(None)` means the
    /// queue closed.
    ///
    /// # Errors
    ///
    /// [`Elapsed`] when nothing arrived within `timeout`.
    pub async fn dequeue_timeout(&self, timeout: Duration) -> Result<Option<Job>, Elapsed> {
        tokio::time::timeout(timeout, self.dequeue()).await
    }

    /// Close the queue and remove everything still waiting, atomically.
    /// Idle consumers wake and observe `None`.
    pub fn close_and_drain(&self) -> Vec<Job> {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            state.buffer.drain_all()
        };
        self.notify.notify_waiters();
        drained
    }

    /// Remove queued jobs whose deadline has passed.
    pub fn take_expired(&self, now: Instant) -> Vec<Job> {
        self.state.lock().buffer.take_expired(now)
    }

    /// Jobs waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.state.lock().buffer.is_full()
    }

    /// Whether `close_and_drain` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Fixed capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
