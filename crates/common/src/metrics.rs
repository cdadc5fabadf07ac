use metrics::{
    log_counter_with_labels,
    register_telemetry_counter,
    MetricLabel,
};

register_telemetry_counter!(
    COMMON_ERRORS_REPORTED_TOTAL,
    "Count of errors reported",
    &["type"]
);
pub fn log_errors_reported_total(error_type: &'static str) {
    log_counter_with_labels(
        &COMMON_ERRORS_REPORTED_TOTAL,
        1,
        vec![MetricLabel::new_const("type", error_type)],
    );
}
