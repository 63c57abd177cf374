//! Status feed: per-worker state for reporters
//!
//! Workers write only their own row; reporters take snapshots. One tokio
//! `RwLock` guards the table, separate from the queue and limiter locks.

use std::collections::BTreeMap;

use provider::ResourceIdentity;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::job::Job;

/// Worker state machine position.
///
/// Transitions:
/// - Idle → Processing (job dequeued)
/// - Processing → Done | RawSaved | Failed | Error (job consumed)
/// - Processing → Exhausted (quota rejection, job requeued)
/// - any → Stopped (queue drained or shutdown)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Idle,
    Processing,
    Done,
    Exhausted,
    Error,
    RawSaved,
    Failed,
    Stopped,
}

impl WorkerStatus {
    /// Status label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Processing => "processing",
            WorkerStatus::Done => "done",
            WorkerStatus::Exhausted => "exhausted",
            WorkerStatus::Error => "error",
            WorkerStatus::RawSaved => "raw_saved",
            WorkerStatus::Failed => "failed",
            WorkerStatus::Stopped => "stopped",
        }
    }

    /// True for outcomes that count toward `completed_count`.
    pub fn is_completion(&self) -> bool {
        matches!(self, WorkerStatus::Done | WorkerStatus::RawSaved)
    }
}

/// One worker's row in the feed.
#[derive(Debug, Clone, Default)]
pub struct WorkerState {
    pub current_job: Option<Job>,
    pub status: WorkerStatus,
    pub completed_count: u64,
    /// Outcome of the most recent job, kept while the worker idles.
    pub last_outcome: Option<WorkerStatus>,
}

/// Serializable view of one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    pub identity: ResourceIdentity,
    pub label: String,
    pub current_file: Option<String>,
    pub status: WorkerStatus,
    pub last_outcome: Option<WorkerStatus>,
    pub completed: u64,
}

#[derive(Debug, Default)]
pub struct StatusFeed {
    workers: RwLock<BTreeMap<ResourceIdentity, WorkerState>>,
}

impl StatusFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row for `identity` in the idle state. Existing rows are kept.
    pub async fn register(&self, identity: ResourceIdentity) {
        self.workers.write().await.entry(identity).or_default();
    }

    /// Set the status without touching the current job.
    pub async fn set_status(&self, identity: ResourceIdentity, status: WorkerStatus) {
        let mut workers = self.workers.write().await;
        workers.entry(identity).or_default().status = status;
    }

    /// Worker picked up `job`.
    pub async fn begin(&self, identity: ResourceIdentity, job: &Job) {
        let mut workers = self.workers.write().await;
        let row = workers.entry(identity).or_default();
        row.current_job = Some(job.clone());
        row.status = WorkerStatus::Processing;
    }

    /// Worker is done with its current job (consumed or handed back).
    ///
    /// Completions (`done`, `raw_saved`) bump `completed_count`.
    pub async fn finish(&self, identity: ResourceIdentity, outcome: WorkerStatus) {
        let mut workers = self.workers.write().await;
        let row = workers.entry(identity).or_default();
        row.current_job = None;
        row.status = outcome;
        row.last_outcome = Some(outcome);
        if outcome.is_completion() {
            row.completed_count += 1;
        }
    }

    pub async fn get(&self, identity: ResourceIdentity) -> Option<WorkerState> {
        self.workers.read().await.get(&identity).cloned()
    }

    /// All rows, ordered by identity.
    pub async fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.workers
            .read()
            .await
            .iter()
            .map(|(identity, state)| WorkerSnapshot {
                identity: *identity,
                label: identity.to_string(),
                current_file: state.current_job.as_ref().map(|j| j.id.clone()),
                status: state.status,
                last_outcome: state.last_outcome,
                completed: state.completed_count,
            })
            .collect()
    }

    /// Sum of completed counts across workers.
    pub async fn total_completed(&self) -> u64 {
        self.workers
            .read()
            .await
            .values()
            .map(|s| s.completed_count)
            .sum()
    }
}
