//! Metric events emitted by a cycle.
//!
//! The core only names and emits events; installing a recorder or
//! exporter is left to the embedding process.

/// Incremented once per cycle, before anything else happens.
pub const CHECKS_TOTAL: &str = "archive_checks_total";
/// Incremented when a downloaded artifact is committed.
pub const DOWNLOAD_SUCCESS_TOTAL: &str = "archive_download_success_total";
/// Incremented when staging fails or the staged artifact is rejected.
pub const DOWNLOAD_FAILURES_TOTAL: &str = "archive_download_failures_total";
/// Size of the most recently committed artifact.
pub const LAST_ARTIFACT_SIZE_BYTES: &str = "archive_last_artifact_size_bytes";
/// Wall-clock duration of the most recent cycle.
pub const LAST_CYCLE_DURATION_SECONDS: &str = "archive_last_cycle_duration_seconds";

/// Destination for cycle metric events.
pub trait MetricSink: Send + Sync {
    fn increment_counter(&self, name: &'static str, source: &str);

    fn set_gauge(&self, name: &'static str, source: &str, value: f64);
}

/// Forwards events to the global `metrics` recorder, labelled by source.
///
/// With no recorder installed every call is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsFacade;

impl MetricSink for MetricsFacade {
    fn increment_counter(&self, name: &'static str, source: &str) {
        metrics::counter!(name, "source" => source.to_string()).increment(1);
    }

    fn set_gauge(&self, name: &'static str, source: &str, value: f64) {
        metrics::gauge!(name, "source" => source.to_string()).set(value);
    }
}
