use crate::FailureKind;
use metrics::{
    describe_counter, describe_histogram, increment_counter, register_counter,
    register_histogram, Counter, Histogram,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::info;

/// Capture counters, bound to whichever recorder is installed when created.
#[derive(Clone)]
pub struct CaptureMetrics {
    pub captures: Counter,
    pub empty_captures: Counter,
    pub timeouts: Counter,
    pub termination_failures: Counter,
    pub capture_duration: Histogram,
}

impl CaptureMetrics {
    pub fn new() -> Self {
        Self {
            captures: register_counter!("snapshot_captures_total"),
            empty_captures: register_counter!("snapshot_captures_empty_total"),
            timeouts: register_counter!("snapshot_timeouts_total"),
            termination_failures: register_counter!("snapshot_termination_failures_total"),
            capture_duration: register_histogram!("snapshot_capture_seconds"),
        }
    }

    pub fn record_capture(&self, duration: Duration, produced_image: bool) {
        self.captures.increment(1);
        if !produced_image {
            self.empty_captures.increment(1);
        }
        self.capture_duration.record(duration.as_secs_f64());
    }

    pub fn record_timeout(&self) {
        self.timeouts.increment(1);
    }

    pub fn record_termination_failure(&self) {
        self.termination_failures.increment(1);
    }
}

impl Default for CaptureMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Count a failed capture stage, labelled by failure kind.
pub fn record_stage_failure(kind: FailureKind) {
    increment_counter!("snapshot_stage_failures_total", "kind" => kind.as_str());
}

/// Install the Prometheus recorder globally; render it later through the handle.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, Box<dyn std::error::Error>> {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::set_boxed_recorder(Box::new(recorder))?;

    describe_counter!("snapshot_captures_total", "Capture calls that returned");
    describe_counter!(
        "snapshot_captures_empty_total",
        "Capture calls that returned no image"
    );
    describe_counter!(
        "snapshot_timeouts_total",
        "Captures abandoned at the external timeout"
    );
    describe_counter!(
        "snapshot_termination_failures_total",
        "Render contexts that failed while being reclaimed"
    );
    describe_counter!(
        "snapshot_stage_failures_total",
        "Capture stages that failed and were recovered locally"
    );
    describe_histogram!("snapshot_capture_seconds", "Wall-clock time per capture");

    info!("Prometheus metrics recorder installed");
    Ok(handle)
}
