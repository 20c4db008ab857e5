//! In-memory job buffer with priority ordering and a hard capacity.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::core::job::Job;

/// Wrapper to make a job orderable by priority (highest first) and FIFO
/// within priority.
struct PriorityJob {
    job: Job,
    /// Arrival order into this buffer.
    seq: u64,
}

impl PartialEq for PriorityJob {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for PriorityJob {}

impl PartialOrd for PriorityJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then earlier arrival (reversed for max-heap)
        self.job
            .priority
            .cmp(&other.job.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority heap holding at most `capacity` jobs.
/// O(log n) push and pop.
///
/// Not synchronized; [`BoundedQueue`](crate::core::queue::BoundedQueue)
/// wraps it in a lock.
pub struct InMemoryQueue {
    capacity: usize,
    next_seq: u64,
    jobs: BinaryHeap<PriorityJob>,
}

impl InMemoryQueue {
    /// Create an empty buffer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_seq: 0,
            jobs: BinaryHeap::with_capacity(capacity.min(1024)),
        }
    }

    /// Insert a job, handing it back if the buffer is full.
    ///
    /// # Errors
    ///
    /// Returns the job unchanged when `len() == capacity()`.
    pub fn push(&mut self, job: Job) -> Result<(), Job> {
        if self.is_full() {
            return Err(job);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.jobs.push(PriorityJob { job, seq });
        Ok(())
    }

    /// Remove the highest-priority, oldest job.
    pub fn pop(&mut self) -> Option<Job> {
        self.jobs.pop().map(|pj| pj.job)
    }

    /// Remove every job whose deadline has passed at `now`, returning them.
    pub fn take_expired(&mut self, now: Instant) -> Vec<Job> {
        let (expired, live): (Vec<_>, Vec<_>) = self
            .jobs
            .drain()
            .partition(|pj| pj.job.is_expired(now));
        self.jobs = live.into_iter().collect();
        expired.into_iter().map(|pj| pj.job).collect()
    }

    /// Remove every job, in dequeue order.
    pub fn drain_all(&mut self) -> Vec<Job> {
        let mut drained = Vec::with_capacity(self.jobs.len());
        while let Some(job) = self.pop() {
            drained.push(job);
        }
        drained
    }

    /// Fixed capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no jobs are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Whether another push would be refused.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.capacity
    }
}
