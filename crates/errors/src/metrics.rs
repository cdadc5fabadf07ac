use metrics::register_telemetry_counter;

register_telemetry_counter!(
    pub BAD_REQUEST_ERRORS_TOTAL,
    "Requests rejected as malformed or unsupported"
);
register_telemetry_counter!(
    pub OVERLOADED_ERRORS_TOTAL,
    "Requests that failed because a dependency was too slow"
);
