//! Scripted provider and in-memory store shared by the worker and dispatcher tests.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use provider::{Provider, ProviderError, ResourceIdentity, ServiceTier};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::PoolContext;
use crate::exhaustion::ExhaustionTracker;
use crate::job::Job;
use crate::queue::JobQueue;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::status::StatusFeed;
use crate::store::{JobStore, StoreFuture};

/// One scripted reply from the fake service.
#[derive(Debug, Clone)]
pub enum Step {
    Json(&'static str),
    Garbage(&'static str),
    Quota,
    Timeout,
    Unavailable,
    Unexpected,
    /// The provider implementation itself panics.
    Panic,
}

impl Step {
    fn into_result(self) -> Result<String, ProviderError> {
        match self {
            Step::Json(s) | Step::Garbage(s) => Ok(s.to_string()),
            Step::Quota => Err(ProviderError::Upstream {
                status: 429,
                body: "RESOURCE_EXHAUSTED: quota exceeded".into(),
            }),
            Step::Timeout => Err(ProviderError::Timeout("deadline elapsed".into())),
            Step::Unavailable => Err(ProviderError::Upstream {
                status: 503,
                body: "model overloaded".into(),
            }),
            Step::Unexpected => Err(ProviderError::Upstream {
                status: 400,
                body: "invalid argument".into(),
            }),
            Step::Panic => panic!("scripted provider panic"),
        }
    }
}

pub const OK_JSON: &str = r#"{"categories":["news"]}"#;

#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<ResourceIdentity, VecDeque<Step>>>,
    calls: Mutex<Vec<(ResourceIdentity, Instant)>>,
    latency: Duration,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Queue replies for `identity`. Once its script runs out, calls succeed.
    pub fn script(self, identity: ResourceIdentity, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(identity)
            .or_default()
            .extend(steps);
        self
    }

    pub fn calls(&self) -> Vec<(ResourceIdentity, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, identity: ResourceIdentity) -> Vec<Instant> {
        self.calls()
            .into_iter()
            .filter(|(id, _)| *id == identity)
            .map(|(_, at)| at)
            .collect()
    }
}

impl Provider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn generate<'a>(
        &'a self,
        identity: ResourceIdentity,
        _prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = provider::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push((identity, Instant::now()));
            let step = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&identity)
                .and_then(|s| s.pop_front())
                .unwrap_or(Step::Json(OK_JSON));
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            step.into_result()
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub results: Mutex<Vec<(String, Value)>>,
    pub raw: Mutex<Vec<(String, String)>>,
    pub unreadable: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn result_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.results.lock().unwrap().iter().map(|(id, _)| id.clone()).collect();
        ids.sort();
        ids
    }

    pub fn raw_ids(&self) -> Vec<String> {
        self.raw.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }
}

impl JobStore for MemoryStore {
    fn load_prompt<'a>(&'a self, job: &'a Job) -> StoreFuture<'a, String> {
        Box::pin(async move {
            if self.unreadable.lock().unwrap().contains(&job.id) {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "not json"));
            }
            Ok(format!("categorize {}", job.id))
        })
    }

    fn save_result<'a>(&'a self, job: &'a Job, result: &'a Value) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.results.lock().unwrap().push((job.id.clone(), result.clone()));
            Ok(())
        })
    }

    fn save_raw<'a>(&'a self, job: &'a Job, raw: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.raw.lock().unwrap().push((job.id.clone(), raw.to_string()));
            Ok(())
        })
    }
}

pub fn job(n: usize) -> Job {
    Job::new(
        format!("in/in_split_{n:04}.json"),
        format!("out/out_split_{n:04}.json"),
    )
}

pub fn pro(idx: usize) -> ResourceIdentity {
    ResourceIdentity::new(idx, ServiceTier::Pro)
}

pub fn flash(idx: usize) -> ResourceIdentity {
    ResourceIdentity::new(idx, ServiceTier::Flash)
}

/// Context over `identities` with a 12s pro / 6s flash call interval.
pub fn context(
    identities: &[ResourceIdentity],
    jobs: impl IntoIterator<Item = Job>,
    provider: Arc<ScriptedProvider>,
    store: Arc<MemoryStore>,
) -> PoolContext {
    let limits = identities.iter().map(|id| {
        let interval = match id.tier {
            ServiceTier::Pro => Duration::from_secs(12),
            ServiceTier::Flash => Duration::from_secs(6),
        };
        (*id, interval)
    });
    PoolContext {
        queue: Arc::new(JobQueue::from_jobs(jobs)),
        limiter: Arc::new(RateLimiter::new(limits)),
        tracker: Arc::new(ExhaustionTracker::new(identities.iter().copied())),
        feed: Arc::new(StatusFeed::new()),
        provider,
        store,
        retry: RetryPolicy::default(),
        dequeue_margin: Duration::from_secs(5),
        shutdown: CancellationToken::new(),
    }
}
