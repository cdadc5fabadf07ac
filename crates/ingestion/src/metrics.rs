use metrics::{
    log_counter,
    log_counter_with_labels,
    register_telemetry_counter,
    register_telemetry_histogram,
    MetricLabel,
    StatusTimer,
    STATUS_LABEL,
};

register_telemetry_counter!(
    INGESTION_SAMPLES_RECEIVED_TOTAL,
    "Raw samples extracted from inbound payloads"
);
register_telemetry_counter!(
    INGESTION_SAMPLES_ADMITTED_TOTAL,
    "Raw samples folded into an aggregate"
);
register_telemetry_counter!(
    INGESTION_SAMPLES_REJECTED_TOTAL,
    "Raw samples dropped before aggregation",
    &["reason"]
);
register_telemetry_counter!(
    INGESTION_AGGREGATES_EMITTED_TOTAL,
    "Aggregates published to the processed channel"
);
register_telemetry_counter!(
    INGESTION_PAYLOAD_FAILURES_TOTAL,
    "Inbound payloads that failed processing as a whole"
);
register_telemetry_counter!(
    INGESTION_PUBLISH_FAILURES_TOTAL,
    "Aggregates that could not be published to the processed channel"
);
register_telemetry_histogram!(
    INGESTION_HANDLE_MESSAGE_SECONDS,
    "Time to process and publish one inbound payload",
    &STATUS_LABEL
);

#[derive(Clone, Copy, Debug, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum RejectReason {
    Malformed,
    NonPositiveCounter,
    LabelLimit,
    SeriesLimit,
}

pub fn log_samples_received(count: usize) {
    log_counter(&INGESTION_SAMPLES_RECEIVED_TOTAL, count as u64);
}

pub fn log_sample_admitted() {
    log_counter(&INGESTION_SAMPLES_ADMITTED_TOTAL, 1);
}

pub fn log_sample_rejected(reason: RejectReason) {
    log_counter_with_labels(
        &INGESTION_SAMPLES_REJECTED_TOTAL,
        1,
        vec![MetricLabel::new_const("reason", reason.into())],
    );
}

pub fn log_aggregates_emitted(count: usize) {
    log_counter(&INGESTION_AGGREGATES_EMITTED_TOTAL, count as u64);
}

pub fn log_payload_failure() {
    log_counter(&INGESTION_PAYLOAD_FAILURES_TOTAL, 1);
}

pub fn log_publish_failure() {
    log_counter(&INGESTION_PUBLISH_FAILURES_TOTAL, 1);
}

pub fn handle_message_timer() -> StatusTimer {
    StatusTimer::new(&INGESTION_HANDLE_MESSAGE_SECONDS)
}
