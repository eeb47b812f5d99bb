//! FIFO job distribution with per-id exclusivity.
//!
//! The queue is filled once before the workers start and drained by them.
//! A job id that is queued or in flight cannot be pushed again, so a single
//! job is never handed to two workers at the same time.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::job::{Job, JobId};

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Job>,
    /// Ids that are queued or in flight.
    claimed: HashSet<JobId>,
    in_flight: HashSet<JobId>,
    closed: bool,
}

/// Shared work queue for the worker pool.
#[derive(Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("JobQueue")
            .field("pending", &state.pending.len())
            .field("in_flight", &state.in_flight.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl JobQueue {
    /// Create an empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `job` at the back.
    ///
    /// Returns false if a job with the same id is already queued or in flight,
    /// or if the queue has been closed.
    pub fn push(&self, job: Job) -> bool {
        let mut state = self.lock();
        if state.closed || !state.claimed.insert(job.id.clone()) {
            return false;
        }
        state.pending.push_back(job);
        true
    }

    /// Take the next job and mark its id in flight.
    ///
    /// Returns `None` once the queue is empty or closed.
    pub fn pop(&self) -> Option<Job> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        let job = state.pending.pop_front()?;
        state.in_flight.insert(job.id.clone());
        Some(job)
    }

    /// Release the in-flight claim on `id`.
    pub fn finish(&self, id: &JobId) {
        let mut state = self.lock();
        if state.in_flight.remove(id) {
            state.claimed.remove(id);
        }
    }

    /// Stop handing out jobs. Queued jobs stay where they are.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Jobs waiting to be handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Returns true if no job is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Remove and return every job that was never handed out.
    pub fn drain_pending(&self) -> Vec<Job> {
        let mut state = self.lock();
        let drained: Vec<Job> = state.pending.drain(..).collect();
        for job in &drained {
            state.claimed.remove(&job.id);
        }
        drained
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Every critical section leaves the state consistent, so a poisoned
        // guard is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FromIterator<Job> for JobQueue {
    fn from_iter<I: IntoIterator<Item = Job>>(iter: I) -> Self {
        let queue = Self::new();
        for job in iter {
            queue.push(job);
        }
        queue
    }
}
