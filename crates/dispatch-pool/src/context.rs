//! Shared state handed to every worker

use std::sync::Arc;
use std::time::Duration;

use provider::Provider;
use tokio_util::sync::CancellationToken;

use crate::exhaustion::ExhaustionTracker;
use crate::queue::JobQueue;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::status::StatusFeed;
use crate::store::JobStore;

/// Everything a worker needs, passed explicitly instead of through globals.
///
/// Cheap to clone: all shared state sits behind `Arc`.
#[derive(Clone)]
pub struct PoolContext {
    pub queue: Arc<JobQueue>,
    pub limiter: Arc<RateLimiter>,
    pub tracker: Arc<ExhaustionTracker>,
    pub feed: Arc<StatusFeed>,
    pub provider: Arc<dyn Provider>,
    pub store: Arc<dyn JobStore>,
    pub retry: RetryPolicy,
    /// Added to an identity's call interval to get its dequeue timeout.
    pub dequeue_margin: Duration,
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for PoolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolContext")
            .field("provider", &self.provider.id())
            .field("retry", &self.retry)
            .field("dequeue_margin", &self.dequeue_margin)
            .field("cancelled", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}
