//! Pool manager: builds the shared context, runs one worker per identity
//!
//! The dispatcher never looks at individual job failures. It starts the
//! workers, waits for their reports, and applies one policy of its own:
//! when running the privileged tier only with `fallback_to_standard` set, it
//! starts standard-tier workers once every privileged identity is exhausted
//! and work is still outstanding.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use provider::{Provider, ResourceIdentity, ServiceTier};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::context::PoolContext;
use crate::error::{Error, Result};
use crate::exhaustion::ExhaustionTracker;
use crate::job::Job;
use crate::queue::JobQueue;
use crate::rate_limit::{RateLimiter, min_interval};
use crate::retry::RetryPolicy;
use crate::status::StatusFeed;
use crate::store::JobStore;
use crate::worker::{Tally, Worker, WorkerReport};

/// Which tiers get workers at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierSelection {
    Pro,
    Flash,
    #[default]
    Both,
}

impl TierSelection {
    pub fn tiers(&self) -> &'static [ServiceTier] {
        match self {
            TierSelection::Pro => &[ServiceTier::Pro],
            TierSelection::Flash => &[ServiceTier::Flash],
            TierSelection::Both => &ServiceTier::ALL,
        }
    }
}

impl fmt::Display for TierSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TierSelection::Pro => "pro",
            TierSelection::Flash => "flash",
            TierSelection::Both => "both",
        })
    }
}

impl FromStr for TierSelection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pro" => Ok(TierSelection::Pro),
            "flash" => Ok(TierSelection::Flash),
            "both" => Ok(TierSelection::Both),
            other => Err(format!("unknown tier selection: {other} (expected pro, flash or both)")),
        }
    }
}

/// Pool parameters. Credentials are referenced by index only; the provider
/// owns the keys.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub credentials: usize,
    pub requests_per_minute: BTreeMap<ServiceTier, u32>,
    pub selection: TierSelection,
    pub fallback_to_standard: bool,
    pub retry: RetryPolicy,
    pub dequeue_margin: Duration,
}

/// Aggregate result of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Jobs handed to this run.
    pub total: usize,
    pub done: u64,
    pub raw_saved: u64,
    pub failed: u64,
    pub error: u64,
    /// Jobs still queued when the run ended, resumable on the next run.
    pub pending: usize,
    pub exhausted: Vec<ResourceIdentity>,
    pub cancelled: bool,
    pub workers: Vec<WorkerReport>,
}

impl RunSummary {
    /// Jobs that reached a terminal outcome.
    pub fn attempted(&self) -> u64 {
        self.done + self.raw_saved + self.failed + self.error
    }
}

pub struct Dispatcher {
    config: DispatchConfig,
    ctx: PoolContext,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        provider: Arc<dyn Provider>,
        store: Arc<dyn JobStore>,
    ) -> Result<Self> {
        if config.credentials == 0 {
            return Err(Error::Config("at least one credential is required".into()));
        }

        let identities = ResourceIdentity::all(config.credentials, &ServiceTier::ALL);
        let mut limits = Vec::with_capacity(identities.len());
        for identity in &identities {
            let rpm = config
                .requests_per_minute
                .get(&identity.tier)
                .copied()
                .ok_or_else(|| {
                    Error::Config(format!("no requests_per_minute for tier {}", identity.tier))
                })?;
            if rpm == 0 {
                return Err(Error::Config(format!(
                    "requests_per_minute for tier {} must be non-zero",
                    identity.tier
                )));
            }
            limits.push((*identity, min_interval(rpm)));
        }

        let ctx = PoolContext {
            queue: Arc::new(JobQueue::new()),
            limiter: Arc::new(RateLimiter::new(limits)),
            tracker: Arc::new(ExhaustionTracker::new(identities)),
            feed: Arc::new(StatusFeed::new()),
            provider,
            store,
            retry: config.retry.clone(),
            dequeue_margin: config.dequeue_margin,
            shutdown: CancellationToken::new(),
        };

        Ok(Self { config, ctx })
    }

    /// Cancelling this token asks every worker to stop at its next
    /// suspension point.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.ctx.shutdown.clone()
    }

    pub fn feed(&self) -> Arc<StatusFeed> {
        self.ctx.feed.clone()
    }

    pub fn queue(&self) -> Arc<JobQueue> {
        self.ctx.queue.clone()
    }

    pub fn tracker(&self) -> Arc<ExhaustionTracker> {
        self.ctx.tracker.clone()
    }

    fn spawn_tier(&self, set: &mut JoinSet<WorkerReport>, tier: ServiceTier) {
        for identity in ResourceIdentity::all(self.config.credentials, &[tier]) {
            set.spawn(Worker::new(identity, self.ctx.clone()).run());
        }
    }

    /// Process `jobs` to completion or shutdown.
    pub async fn run(&self, jobs: Vec<Job>) -> RunSummary {
        let total = jobs.len();
        for job in jobs {
            self.ctx.queue.enqueue(job).await;
        }

        info!(
            jobs = total,
            credentials = self.config.credentials,
            selection = %self.config.selection,
            fallback = self.config.fallback_to_standard,
            "dispatch started"
        );

        let mut set = JoinSet::new();
        for tier in self.config.selection.tiers() {
            self.spawn_tier(&mut set, *tier);
        }

        let mut fallback_armed =
            self.config.selection == TierSelection::Pro && self.config.fallback_to_standard;
        let mut reports = Vec::new();

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                // A panicking worker's lease has already put its job back.
                Err(e) => error!(error = %e, "worker task failed"),
            }

            if fallback_armed
                && self.ctx.tracker.all_high_tier_exhausted()
                && !self.ctx.shutdown.is_cancelled()
                && !self.ctx.queue.is_drained().await
            {
                fallback_armed = false;
                warn!(
                    pending = self.ctx.queue.size().await,
                    "all pro identities exhausted, falling back to flash"
                );
                self.spawn_tier(&mut set, ServiceTier::Flash);
            }
        }

        let mut tally = Tally::default();
        for report in &reports {
            tally.add(&report.tally);
        }
        reports.sort_by_key(|r| r.identity);

        let summary = RunSummary {
            total,
            done: tally.done,
            raw_saved: tally.raw_saved,
            failed: tally.failed,
            error: tally.error,
            pending: self.ctx.queue.size().await,
            exhausted: self.ctx.tracker.exhausted(),
            cancelled: self.ctx.shutdown.is_cancelled(),
            workers: reports,
        };

        info!(
            total = summary.total,
            attempted = summary.attempted(),
            done = summary.done,
            raw_saved = summary.raw_saved,
            failed = summary.failed,
            error = summary.error,
            pending = summary.pending,
            exhausted = summary.exhausted.len(),
            cancelled = summary.cancelled,
            "dispatch finished"
        );
        summary
    }
}
