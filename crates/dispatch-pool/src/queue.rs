//! Shared FIFO of pending jobs
//!
//! A single mutex guards both the pending list and the count of jobs leased
//! to workers, so a job is handed to at most one worker and the "nothing
//! pending, nothing in flight" check is atomic. The lock is never held across
//! an `.await`, which lets a dropped [`Lease`] return its job synchronously.
//! Waiters park on a `Notify` and are woken by every enqueue or requeue.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::job::Job;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Job>,
    /// Jobs dequeued but not yet completed or requeued.
    in_flight: usize,
}

/// Thread-safe work list with lease tracking.
#[derive(Debug, Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a queue preloaded with `jobs`, in order.
    pub fn from_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: jobs.into_iter().collect(),
                in_flight: 0,
            }),
            available: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        // No code under the lock can panic, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a job.
    pub async fn enqueue(&self, job: Job) {
        self.state().pending.push_back(job);
        self.available.notify_waiters();
    }

    /// Take the next job, waiting up to `timeout` for one to appear.
    ///
    /// Returns `None` on timeout or when `cancel` fires. A returned job is
    /// leased to the caller until it is passed to `complete` or `requeue`.
    pub async fn dequeue(&self, timeout: Duration, cancel: &CancellationToken) -> Option<Job> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a concurrent enqueue
            // between the check and the wait is not missed.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if cancel.is_cancelled() {
                return None;
            }

            {
                let mut state = self.state();
                if let Some(job) = state.pending.pop_front() {
                    state.in_flight += 1;
                    return Some(job);
                }
            }

            tokio::select! {
                _ = &mut notified => continue,
                _ = sleep_until(deadline) => return None,
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// Like [`dequeue`](Self::dequeue), but the job comes back inside a
    /// guard that requeues it if dropped unresolved.
    pub async fn lease(&self, timeout: Duration, cancel: &CancellationToken) -> Option<Lease<'_>> {
        let job = self.dequeue(timeout, cancel).await?;
        Some(Lease {
            queue: self,
            job,
            resolved: false,
        })
    }

    fn put_back(&self, job: Job) {
        {
            let mut state = self.state();
            state.in_flight = state.in_flight.saturating_sub(1);
            debug!(job = %job.id, pending = state.pending.len() + 1, "job requeued");
            state.pending.push_back(job);
        }
        self.available.notify_waiters();
    }

    fn release(&self) {
        let mut state = self.state();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    /// Return a leased job to the back of the queue without consuming it.
    pub async fn requeue(&self, job: Job) {
        self.put_back(job);
    }

    /// Release the lease on a consumed job. The job is dropped.
    pub async fn complete(&self, job: Job) {
        self.release();
        drop(job);
    }

    /// Pending job count.
    pub async fn size(&self) -> usize {
        self.state().pending.len()
    }

    /// Jobs currently leased to workers.
    pub async fn in_flight(&self) -> usize {
        self.state().in_flight
    }

    /// True when nothing is pending and nothing is leased.
    pub async fn is_drained(&self) -> bool {
        let state = self.state();
        state.pending.is_empty() && state.in_flight == 0
    }

    /// Identifiers of the jobs still pending, in queue order.
    pub async fn pending_ids(&self) -> Vec<String> {
        self.state().pending.iter().map(|j| j.id.clone()).collect()
    }
}

/// A leased job that must be resolved with [`complete`](Lease::complete) or
/// [`requeue`](Lease::requeue).
///
/// If the holder unwinds or is aborted first, `Drop` returns the job to the
/// queue so the pool can still drain.
#[derive(Debug)]
pub struct Lease<'a> {
    queue: &'a JobQueue,
    job: Job,
    resolved: bool,
}

impl Lease<'_> {
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// The job was consumed.
    pub fn complete(mut self) {
        self.resolved = true;
        self.queue.release();
    }

    /// Hand the job back for another worker.
    pub fn requeue(mut self) {
        self.resolved = true;
        self.queue.put_back(self.job.clone());
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            warn!(job = %self.job.id, "lease dropped unresolved, returning job to queue");
            self.queue.put_back(self.job.clone());
        }
    }
}
