// Prometheus metrics for the grading API

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    /// Finished grading calls by outcome (`completed` or an error code)
    pub static ref GRADINGS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "judgemaster_gradings_total",
        "Grading calls by outcome",
        &["outcome"]
    )
    .expect("Failed to create counter");

    /// Per-test verdicts across all completed gradings
    pub static ref TEST_VERDICTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "judgemaster_test_verdicts_total",
        "Test case verdicts by status",
        &["status"]
    )
    .expect("Failed to create counter");

    pub static ref GRADING_DURATION: HistogramVec = register_histogram_vec!(
        "judgemaster_grading_duration_seconds",
        "Wall-clock time spent grading one submission",
        &["language"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
    )
    .expect("Failed to create histogram");

    pub static ref ACTIVE_GRADINGS: IntGauge = register_int_gauge!(
        "judgemaster_active_gradings",
        "Gradings currently executing"
    )
    .expect("Failed to create gauge");
}

/// Touch every metric so it is exported before its first sample.
pub fn init() {
    lazy_static::initialize(&GRADINGS_TOTAL);
    lazy_static::initialize(&TEST_VERDICTS_TOTAL);
    lazy_static::initialize(&GRADING_DURATION);
    lazy_static::initialize(&ACTIVE_GRADINGS);
}

/// Render the default registry in the Prometheus text format.
pub fn gather() -> prometheus::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Keeps the active gauge honest even when a request future is dropped.
pub struct ActiveGrading;

impl ActiveGrading {
    pub fn start() -> Self {
        ACTIVE_GRADINGS.inc();
        Self
    }
}

impl Drop for ActiveGrading {
    fn drop(&mut self) {
        ACTIVE_GRADINGS.dec();
    }
}
