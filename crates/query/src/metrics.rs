use common::types::Operation;
use metrics::{
    log_counter,
    register_telemetry_counter,
    register_telemetry_histogram,
    MetricLabel,
    StatusTimer,
};

register_telemetry_histogram!(
    QUERY_EXECUTE_SECONDS,
    "Time to answer one time-series query",
    &["status", "operation"]
);
register_telemetry_counter!(
    QUERY_CORRUPT_SKETCH_ROWS_TOTAL,
    "Stored sketches that failed to decode and were left out of a percentile"
);

pub fn execute_timer(operation: Operation) -> StatusTimer {
    let mut timer = StatusTimer::new(&QUERY_EXECUTE_SECONDS);
    timer.add_label(MetricLabel::new_const("operation", operation.into()));
    timer
}

pub fn log_corrupt_sketch() {
    log_counter(&QUERY_CORRUPT_SKETCH_ROWS_TOTAL, 1);
}
