//! Periodic progress logging from the status feed

use std::sync::Arc;
use std::time::Duration;

use dispatch_pool::{CancellationToken, JobQueue, StatusFeed, WorkerSnapshot, WorkerStatus};
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Aggregate view of one status-feed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub completed: u64,
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub active_workers: usize,
}

pub fn progress(workers: &[WorkerSnapshot], pending: usize, total: usize) -> Progress {
    Progress {
        completed: workers.iter().map(|w| w.completed).sum(),
        total,
        pending,
        processing: workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Processing)
            .count(),
        active_workers: workers
            .iter()
            .filter(|w| !matches!(w.status, WorkerStatus::Exhausted | WorkerStatus::Stopped))
            .count(),
    }
}

/// Log one line per worker plus an overall progress line.
pub async fn report_once(feed: &StatusFeed, queue: &JobQueue, total: usize) -> Progress {
    let workers = feed.snapshot().await;
    for worker in &workers {
        info!(
            worker = %worker.label,
            status = worker.status.label(),
            file = worker.current_file.as_deref().unwrap_or("-"),
            completed = worker.completed,
            "worker status"
        );
    }
    let progress = progress(&workers, queue.size().await, total);
    info!(
        completed = progress.completed,
        total = progress.total,
        pending = progress.pending,
        processing = progress.processing,
        active_workers = progress.active_workers,
        "progress"
    );
    progress
}

/// Report every `interval` until `stop` fires.
pub async fn run(
    feed: Arc<StatusFeed>,
    queue: Arc<JobQueue>,
    total: usize,
    interval: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so the pool can start.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                report_once(&feed, &queue, total).await;
            }
            _ = stop.cancelled() => break,
        }
    }
}
