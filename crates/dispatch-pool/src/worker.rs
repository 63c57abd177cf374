//! One execution unit bound to one resource identity
//!
//! A worker loops: check exhaustion, dequeue, acquire the rate-limit slot,
//! call the service, classify the outcome, record it. Every failure is
//! classified here; the dispatcher only sees the final `WorkerReport`.
//! The job is held as a queue [`Lease`](crate::Lease), so a worker
//! that panics mid-job still hands it back.

use std::time::Duration;

use provider::{FailureClass, ResourceIdentity, classify, parse_structured};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::context::PoolContext;
use crate::error::Error;
use crate::job::Job;
use crate::metrics;
use crate::status::WorkerStatus;

/// Per-worker outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub done: u64,
    pub raw_saved: u64,
    pub failed: u64,
    pub error: u64,
    /// Jobs handed back to the queue (quota rejection or shutdown).
    pub requeued: u64,
}

impl Tally {
    pub fn add(&mut self, other: &Tally) {
        self.done += other.done;
        self.raw_saved += other.raw_saved;
        self.failed += other.failed;
        self.error += other.error;
        self.requeued += other.requeued;
    }

    /// Jobs this worker consumed.
    pub fn consumed(&self) -> u64 {
        self.done + self.raw_saved + self.failed + self.error
    }
}

/// What a worker looked like when it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub identity: ResourceIdentity,
    /// `Exhausted` or `Stopped`.
    pub status: WorkerStatus,
    pub tally: Tally,
}

/// Result of processing one dequeued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Done,
    RawSaved,
    Failed,
    Error,
    /// Identity rejected for quota; job goes back to the queue.
    QuotaExceeded,
    /// Shutdown observed before the next call; job goes back to the queue.
    Cancelled,
}

impl JobOutcome {
    fn status(self) -> WorkerStatus {
        match self {
            JobOutcome::Done => WorkerStatus::Done,
            JobOutcome::RawSaved => WorkerStatus::RawSaved,
            JobOutcome::Failed => WorkerStatus::Failed,
            JobOutcome::Error => WorkerStatus::Error,
            JobOutcome::QuotaExceeded => WorkerStatus::Exhausted,
            JobOutcome::Cancelled => WorkerStatus::Stopped,
        }
    }

    fn consumes_job(self) -> bool {
        !matches!(self, JobOutcome::QuotaExceeded | JobOutcome::Cancelled)
    }
}

pub struct Worker {
    identity: ResourceIdentity,
    ctx: PoolContext,
}

impl Worker {
    pub fn new(identity: ResourceIdentity, ctx: PoolContext) -> Self {
        Self { identity, ctx }
    }

    pub fn identity(&self) -> ResourceIdentity {
        self.identity
    }

    /// Run until the identity is exhausted, the queue drains, or shutdown.
    pub async fn run(self) -> WorkerReport {
        let identity = self.identity;
        let ctx = &self.ctx;
        ctx.feed.register(identity).await;

        let interval = ctx.limiter.min_interval(identity).unwrap_or_default();
        let dequeue_timeout = interval + ctx.dequeue_margin;
        let mut tally = Tally::default();

        info!(%identity, provider = ctx.provider.id(), "worker started");

        let status = loop {
            if ctx.tracker.is_exhausted(identity) {
                break WorkerStatus::Exhausted;
            }
            if ctx.shutdown.is_cancelled() {
                break WorkerStatus::Stopped;
            }

            ctx.feed.set_status(identity, WorkerStatus::Idle).await;
            let Some(lease) = ctx.queue.lease(dequeue_timeout, &ctx.shutdown).await else {
                if ctx.shutdown.is_cancelled() || ctx.queue.is_drained().await {
                    break WorkerStatus::Stopped;
                }
                // Another worker still holds a job that may come back.
                continue;
            };

            ctx.feed.begin(identity, lease.job()).await;
            let outcome = self.process(lease.job()).await;
            let status = outcome.status();

            if outcome.consumes_job() {
                lease.complete();
                metrics::record_job_outcome(status);
            } else {
                lease.requeue();
                tally.requeued += 1;
            }
            ctx.feed.finish(identity, status).await;

            match outcome {
                JobOutcome::Done => tally.done += 1,
                JobOutcome::RawSaved => tally.raw_saved += 1,
                JobOutcome::Failed => tally.failed += 1,
                JobOutcome::Error => tally.error += 1,
                JobOutcome::QuotaExceeded => {}
                JobOutcome::Cancelled => break WorkerStatus::Stopped,
            }
        };

        ctx.feed.set_status(identity, status).await;
        info!(
            %identity,
            status = status.label(),
            done = tally.done,
            raw_saved = tally.raw_saved,
            failed = tally.failed,
            error = tally.error,
            requeued = tally.requeued,
            "worker finished"
        );
        WorkerReport {
            identity,
            status,
            tally,
        }
    }

    async fn process(&self, job: &Job) -> JobOutcome {
        let identity = self.identity;
        let ctx = &self.ctx;

        let prompt = match ctx.store.load_prompt(job).await {
            Ok(prompt) => prompt,
            Err(e) => {
                error!(%identity, job = %job.id, error = %e, "failed to load job input");
                return JobOutcome::Error;
            }
        };

        let max_attempts = ctx.retry.max_attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;

            match ctx.limiter.acquire(identity, &ctx.shutdown).await {
                Ok(()) => {}
                Err(Error::Cancelled) => {
                    debug!(%identity, job = %job.id, "shutdown while waiting for rate-limit slot");
                    return JobOutcome::Cancelled;
                }
                Err(e) => {
                    error!(%identity, job = %job.id, error = %e, "rate limiter rejected identity");
                    return JobOutcome::Error;
                }
            }

            debug!(%identity, job = %job.id, attempt, "calling service");
            let started = Instant::now();
            let result = ctx.provider.generate(identity, &prompt).await;
            let elapsed = started.elapsed().as_secs_f64();

            let err = match result {
                Ok(text) => {
                    metrics::record_call(identity.tier, "ok", elapsed);
                    return self.persist(job, &text).await;
                }
                Err(err) => err,
            };

            let class = classify(&err);
            metrics::record_call(identity.tier, class.label(), elapsed);

            match class {
                FailureClass::QuotaExceeded => {
                    warn!(%identity, job = %job.id, error = %err, "quota exceeded, requeueing job");
                    if ctx.tracker.mark_exhausted(identity) {
                        metrics::record_exhausted(identity.tier);
                    }
                    return JobOutcome::QuotaExceeded;
                }
                FailureClass::Transient if attempt < max_attempts => {
                    let delay = ctx.retry.delay_after(attempt);
                    warn!(
                        %identity,
                        job = %job.id,
                        attempt,
                        max_attempts,
                        backoff_secs = delay.as_secs_f64(),
                        error = %err,
                        "transient failure, backing off"
                    );
                    metrics::record_retry(identity.tier);
                    if !self.backoff(delay).await {
                        return JobOutcome::Cancelled;
                    }
                }
                FailureClass::Transient => {
                    warn!(%identity, job = %job.id, attempts = attempt, error = %err, "retries exhausted");
                    return JobOutcome::Failed;
                }
                FailureClass::Unclassified => {
                    error!(%identity, job = %job.id, kind = err.kind(), error = %err, "unclassified failure");
                    return JobOutcome::Error;
                }
            }
        }
    }

    /// Sleep for `delay`. Returns `false` if shutdown fired first.
    async fn backoff(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.ctx.shutdown.cancelled() => false,
        }
    }

    async fn persist(&self, job: &Job, text: &str) -> JobOutcome {
        let identity = self.identity;
        let store = &self.ctx.store;

        match parse_structured(text) {
            Ok(value) => match store.save_result(job, &value).await {
                Ok(()) => {
                    info!(%identity, job = %job.id, "job done");
                    JobOutcome::Done
                }
                Err(e) => {
                    error!(%identity, job = %job.id, error = %e, "failed to write result");
                    JobOutcome::Error
                }
            },
            Err(malformed) => {
                warn!(%identity, job = %job.id, reason = %malformed.reason, "unparseable output, saving raw");
                match store.save_raw(job, &malformed.raw).await {
                    Ok(()) => JobOutcome::RawSaved,
                    Err(e) => {
                        error!(%identity, job = %job.id, error = %e, "failed to write raw output");
                        JobOutcome::Error
                    }
                }
            }
        }
    }
}
