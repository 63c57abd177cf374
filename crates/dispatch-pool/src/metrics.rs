//! Pool metrics
//!
//! Emitted through the `metrics` facade; the binary decides whether a
//! recorder is installed.
//!
//! - `dispatch_calls_total` (counter): labels `tier`, `result`
//! - `dispatch_call_duration_seconds` (histogram): label `tier`
//! - `dispatch_jobs_total` (counter): label `outcome`
//! - `dispatch_retries_total` (counter): label `tier`
//! - `dispatch_identities_exhausted_total` (counter): label `tier`

use provider::ServiceTier;

use crate::status::WorkerStatus;

pub const CALL_DURATION_METRIC: &str = "dispatch_call_duration_seconds";

/// Histogram buckets for call latency, 100ms to 5 minutes.
pub const CALL_DURATION_BUCKETS: &[f64] = &[
    0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0,
];

/// Record one service call. `result` is "ok" or a failure class label.
pub fn record_call(tier: ServiceTier, result: &str, duration_secs: f64) {
    metrics::counter!("dispatch_calls_total", "tier" => tier.label(), "result" => result.to_string())
        .increment(1);
    metrics::histogram!(CALL_DURATION_METRIC, "tier" => tier.label()).record(duration_secs);
}

/// Record a job leaving a worker with `outcome`.
pub fn record_job_outcome(outcome: WorkerStatus) {
    metrics::counter!("dispatch_jobs_total", "outcome" => outcome.label()).increment(1);
}

pub fn record_retry(tier: ServiceTier) {
    metrics::counter!("dispatch_retries_total", "tier" => tier.label()).increment(1);
}

pub fn record_exhausted(tier: ServiceTier) {
    metrics::counter!("dispatch_identities_exhausted_total", "tier" => tier.label())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(CALL_DURATION_METRIC.to_string()),
                CALL_DURATION_BUCKETS,
            )
            .expect("failed to set histogram buckets")
            .build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn no_recorder_is_a_no_op() {
        record_call(ServiceTier::Pro, "ok", 1.0);
        record_job_outcome(WorkerStatus::Done);
        record_retry(ServiceTier::Flash);
        record_exhausted(ServiceTier::Pro);
    }

    #[test]
    fn calls_render_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_call(ServiceTier::Pro, "ok", 3.2);
        record_call(ServiceTier::Flash, "transient", 0.4);

        let output = handle.render();
        assert!(output.contains("dispatch_calls_total"));
        assert!(output.contains("tier=\"pro\""));
        assert!(output.contains("result=\"transient\""));
        assert!(
            output.contains("dispatch_call_duration_seconds_bucket"),
            "duration must render as a histogram"
        );
    }

    #[test]
    fn outcomes_retries_and_exhaustion_are_labelled() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_job_outcome(WorkerStatus::RawSaved);
        record_retry(ServiceTier::Flash);
        record_exhausted(ServiceTier::Pro);

        let output = handle.render();
        assert!(output.contains("dispatch_jobs_total{outcome=\"raw_saved\"} 1"));
        assert!(output.contains("dispatch_retries_total{tier=\"flash\"} 1"));
        assert!(output.contains("dispatch_identities_exhausted_total{tier=\"pro\"} 1"));
    }
}
