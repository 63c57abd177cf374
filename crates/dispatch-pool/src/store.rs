//! Storage seam between the pool and the filesystem
//!
//! Workers never touch files directly. The binary supplies a filesystem
//! implementation; tests supply an in-memory one.

use std::future::Future;
use std::io;
use std::pin::Pin;

use serde_json::Value;

use crate::job::Job;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = io::Result<T>> + Send + 'a>>;

/// Loads job input and persists job output.
pub trait JobStore: Send + Sync {
    /// Build the prompt text for `job` from its source.
    fn load_prompt<'a>(&'a self, job: &'a Job) -> StoreFuture<'a, String>;

    /// Persist a structured result at the job's destination.
    fn save_result<'a>(&'a self, job: &'a Job, result: &'a Value) -> StoreFuture<'a, ()>;

    /// Persist unparseable service output alongside the results.
    fn save_raw<'a>(&'a self, job: &'a Job, raw: &'a str) -> StoreFuture<'a, ()>;
}
