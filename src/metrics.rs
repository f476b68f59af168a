//metrics.rs
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_histogram, register_int_counter_vec, Counter, Histogram,
    HistogramOpts, IntCounterVec, Opts,
};

lazy_static! {
    // Poll cycle metrics
    pub static ref POLL_CYCLES_RUN: Counter = register_counter!(Opts::new(
        "poll_cycles_run_total",
        "Poll cycles executed by this instance"
    ))
    .unwrap();

    pub static ref POLL_CYCLES_SKIPPED: Counter = register_counter!(Opts::new(
        "poll_cycles_skipped_total",
        "Poll cycles skipped because another instance held the lock"
    ))
    .unwrap();

    pub static ref REGION_FAILURES: IntCounterVec = register_int_counter_vec!(
        Opts::new("region_failures_total", "Region polls abandoned for the tick"),
        &["region"]
    )
    .unwrap();

    // Per-change metrics
    pub static ref CHANGES_FETCHED: IntCounterVec = register_int_counter_vec!(
        Opts::new("changes_fetched_total", "Raw changes received from CSR"),
        &["region"]
    )
    .unwrap();

    pub static ref NOTIFICATIONS_INSERTED: Counter = register_counter!(Opts::new(
        "notifications_inserted_total",
        "New notifications stored"
    ))
    .unwrap();

    pub static ref DUPLICATES_SKIPPED: Counter = register_counter!(Opts::new(
        "duplicates_skipped_total",
        "Changes discarded as already stored"
    ))
    .unwrap();

    pub static ref CHANGES_DROPPED: Counter = register_counter!(Opts::new(
        "changes_dropped_total",
        "Unchanged and shift-level edit changes that are never notified"
    ))
    .unwrap();

    pub static ref MAPPING_ERRORS: Counter = register_counter!(Opts::new(
        "mapping_errors_total",
        "Raw changes rejected during normalization"
    ))
    .unwrap();

    pub static ref ACKNOWLEDGEMENT_FAILURES: Counter = register_counter!(Opts::new(
        "acknowledgement_failures_total",
        "Failed acknowledgements back to CSR"
    ))
    .unwrap();

    // Delivery and retention
    pub static ref SUMMARIES_DELIVERED: Counter = register_counter!(Opts::new(
        "summaries_delivered_total",
        "Notification summaries handed to the sink"
    ))
    .unwrap();

    pub static ref NOTIFICATIONS_PRUNED: Counter = register_counter!(Opts::new(
        "notifications_pruned_total",
        "Notifications removed by the retention job"
    ))
    .unwrap();

    pub static ref POLL_DURATION: Histogram = register_histogram!(
        HistogramOpts::new(
            "poll_duration_seconds",
            "Time taken by a full poll cycle"
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0])
    )
    .unwrap();
}

// Function to expose metrics endpoint
pub fn metrics_handler() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        return format!("Error encoding metrics: {}", e);
    }

    match String::from_utf8(buffer) {
        Ok(metrics) => metrics,
        Err(e) => format!("Error converting metrics to string: {}", e),
    }
}
