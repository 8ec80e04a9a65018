//! Prometheus metrics for the pipeline.
//!
//! - Jobs (submitted, finished by result)
//! - Stages (permit wait time, time spent holding the permit)
//! - Transfer (bytes downloaded)

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::warn;

// =============================================================================
// Jobs
// =============================================================================

/// Jobs accepted by `submit` or `retry`.
pub static JOBS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("audiograb_jobs_submitted_total", "Total job runs started").unwrap()
});

/// Job runs that reached a terminal state.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "audiograb_jobs_finished_total",
            "Total job runs finished, by result",
        ),
        &["result"], // "completed", "failed", "canceled"
    )
    .unwrap()
});

// =============================================================================
// Stages
// =============================================================================

/// Time between requesting a stage permit and being granted it.
pub static STAGE_WAIT: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "audiograb_stage_wait_seconds",
            "Time spent queued for a stage permit",
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
        &["stage"],
    )
    .unwrap()
});

/// Time spent holding a stage permit.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "audiograb_stage_duration_seconds",
            "Time spent running a stage",
        )
        .buckets(vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 180.0, 600.0, 1800.0]),
        &["stage"],
    )
    .unwrap()
});

// =============================================================================
// Transfer
// =============================================================================

pub static BYTES_DOWNLOADED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "audiograb_bytes_downloaded_total",
        "Total bytes received by the download stage",
    )
    .unwrap()
});

/// Returns all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(STAGE_WAIT.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(BYTES_DOWNLOADED.clone()),
    ]
}

/// Registry holding [`all_metrics`].
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    for metric in all_metrics() {
        if let Err(e) = registry.register(metric) {
            warn!(error = %e, "Failed to register metric");
        }
    }
    registry
});

/// Encodes [`REGISTRY`] in the Prometheus text format.
pub fn encode_metrics() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
