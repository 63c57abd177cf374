//! Rate-limited worker pool for batch categorization jobs
//!
//! Drives a queue of jobs against the classification service through one
//! worker per resource identity (credential × service tier). Each identity
//! has its own call-interval gate and its own exhaustion flag, so a quota
//! rejection on one key never slows down the others.
//!
//! Job lifecycle:
//! 1. Dispatcher enqueues every outstanding job and spawns the workers
//! 2. A worker dequeues a job, waits for its identity's rate-limit slot, calls the service
//! 3. Structured output → result file (`done`); unparseable output → raw side file (`raw_saved`)
//! 4. Quota rejection → identity retired, job requeued for the remaining identities
//! 5. Transient failure → backoff and retry in place, `failed` once the attempts run out
//! 6. Any other failure → `error`
//! 7. Workers stop when the queue drains, their identity is exhausted, or shutdown is requested

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod exhaustion;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod status;
pub mod store;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use context::PoolContext;
pub use dispatcher::{DispatchConfig, Dispatcher, RunSummary, TierSelection};
pub use error::{Error, Result};
pub use exhaustion::ExhaustionTracker;
pub use job::Job;
pub use queue::{JobQueue, Lease};
pub use rate_limit::{RateLimiter, min_interval};
pub use retry::RetryPolicy;
pub use status::{StatusFeed, WorkerSnapshot, WorkerState, WorkerStatus};
pub use store::{JobStore, StoreFuture};
pub use worker::{Tally, Worker, WorkerReport};

pub use provider::{ResourceIdentity, ServiceTier};
pub use tokio_util::sync::CancellationToken;
