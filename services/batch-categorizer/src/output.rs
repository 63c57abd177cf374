//! Filesystem job store
//!
//! Reads job inputs, writes results and raw side files. All writes use a
//! temp file in the target directory plus rename, so an interrupted run
//! never leaves a half-written `out_*.json` that discovery would treat as
//! finished.

use std::io;
use std::path::{Path, PathBuf};

use dispatch_pool::{Job, JobStore, StoreFuture};
use serde_json::Value;
use tracing::debug;

use crate::discovery::raw_path;
use crate::prompt::PromptTemplate;

pub struct FsJobStore {
    template: PromptTemplate,
    raw_dir: Option<PathBuf>,
}

impl FsJobStore {
    pub fn new(template: PromptTemplate, raw_dir: Option<PathBuf>) -> Self {
        Self { template, raw_dir }
    }

    async fn read_input(&self, job: &Job) -> io::Result<String> {
        let contents = tokio::fs::read_to_string(job.source()).await?;
        let input: Value = serde_json::from_str(&contents).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not valid JSON: {e}", job.source().display()),
            )
        })?;
        let links = input
            .get("data")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        debug!(job = %job.id, links, "loaded job input");
        Ok(self.template.render(&input))
    }
}

impl JobStore for FsJobStore {
    fn load_prompt<'a>(&'a self, job: &'a Job) -> StoreFuture<'a, String> {
        Box::pin(self.read_input(job))
    }

    fn save_result<'a>(&'a self, job: &'a Job, result: &'a Value) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let json = serde_json::to_string_pretty(result)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            write_atomic(job.destination(), json.as_bytes()).await
        })
    }

    fn save_raw<'a>(&'a self, job: &'a Job, raw: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = raw_path(job.destination(), self.raw_dir.as_deref());
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            write_atomic(&path, raw.as_bytes()).await
        })
    }
}

/// Write `contents` to a temp file next to `path`, then rename over it.
async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("{} has no parent directory", path.display()))
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(".{name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}
