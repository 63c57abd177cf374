//! Prometheus recorder setup and end-of-run snapshot
//!
//! The pool emits its metrics through the `metrics` facade (see
//! `dispatch_pool::metrics`). This module installs the recorder that
//! collects them and renders the text exposition format for `/metrics` and
//! for the optional `metrics_file`.

use std::path::Path;

use anyhow::{Context, Result};
use dispatch_pool::metrics::{CALL_DURATION_BUCKETS, CALL_DURATION_METRIC};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

fn builder() -> Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(CALL_DURATION_METRIC.to_string()),
            CALL_DURATION_BUCKETS,
        )
        .context("failed to set histogram buckets")
}

/// Install the global recorder and return a handle for rendering.
///
/// `dispatch_call_duration_seconds` gets explicit buckets so it renders as a
/// histogram rather than a summary.
pub fn install_recorder() -> Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Write the current metrics to `path` in Prometheus text format.
pub fn write_snapshot(handle: &PrometheusHandle, path: &Path) -> Result<()> {
    std::fs::write(path, handle.render())
        .with_context(|| format!("failed to write metrics to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_pool::{ServiceTier, WorkerStatus};

    #[test]
    fn snapshot_contains_pool_metrics() {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();
        let _guard = ::metrics::set_default_local_recorder(&recorder);

        dispatch_pool::metrics::record_call(ServiceTier::Flash, "ok", 2.0);
        dispatch_pool::metrics::record_job_outcome(WorkerStatus::Done);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.prom");
        write_snapshot(&handle, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("dispatch_call_duration_seconds_bucket"));
        assert!(text.contains("dispatch_jobs_total{outcome=\"done\"} 1"));
    }

    #[test]
    fn snapshot_to_missing_dir_fails_with_path() {
        let recorder = builder().unwrap().build_recorder();
        let err = write_snapshot(&recorder.handle(), Path::new("/nonexistent/dir/m.prom")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/dir/m.prom"));
    }
}
