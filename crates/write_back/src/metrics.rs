use metrics::{
    log_counter,
    log_gauge,
    register_telemetry_counter,
    register_telemetry_gauge,
    register_telemetry_histogram,
    StatusTimer,
    STATUS_LABEL,
};

register_telemetry_gauge!(
    WRITE_BACK_PENDING_AGGREGATES,
    "Aggregates waiting in the write-back queue"
);
register_telemetry_histogram!(
    WRITE_BACK_FLUSH_SECONDS,
    "Time to write one batch to storage",
    &STATUS_LABEL
);
register_telemetry_counter!(
    WRITE_BACK_FLUSHED_AGGREGATES_TOTAL,
    "Aggregates persisted by a successful flush"
);
register_telemetry_counter!(
    WRITE_BACK_DROPPED_AGGREGATES_TOTAL,
    "Aggregates lost to a failed flush"
);
register_telemetry_counter!(
    WRITE_BACK_UNDECODABLE_MESSAGES_TOTAL,
    "Processed-channel records that did not decode as an aggregate"
);

pub fn log_pending(len: usize) {
    log_gauge(&WRITE_BACK_PENDING_AGGREGATES, len as f64);
}

pub fn flush_timer() -> StatusTimer {
    StatusTimer::new(&WRITE_BACK_FLUSH_SECONDS)
}

pub fn log_flushed(count: usize) {
    log_counter(&WRITE_BACK_FLUSHED_AGGREGATES_TOTAL, count as u64);
}

pub fn log_dropped(count: usize) {
    log_counter(&WRITE_BACK_DROPPED_AGGREGATES_TOTAL, count as u64);
}

pub fn log_undecodable_message() {
    log_counter(&WRITE_BACK_UNDECODABLE_MESSAGES_TOTAL, 1);
}
