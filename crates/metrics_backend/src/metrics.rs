use metrics::{
    log_counter,
    register_telemetry_counter,
};

register_telemetry_counter!(
    RAW_INPUT_LINES_FORWARDED_TOTAL,
    "Lines read from the raw input and handed to the ingestion worker"
);
pub fn log_raw_line_forwarded() {
    log_counter(&RAW_INPUT_LINES_FORWARDED_TOTAL, 1);
}
