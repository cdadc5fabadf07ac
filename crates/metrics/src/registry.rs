use std::{
    collections::HashSet,
    env,
    sync::LazyLock,
};

use parking_lot::Mutex;
use prometheus::{
    Encoder,
    Registry,
    TextEncoder,
};

use crate::{
    log_counter_with_labels,
    register_telemetry_counter,
    MetricLabel,
};

/// Every metric name ends in one of these units.
const UNIT_SUFFIXES: &[&str] = &[
    "_seconds",
    "_bytes",
    "_samples",
    "_aggregates",
    "_series",
    "_messages",
    "_batches",
    "_points",
    "_rows",
    "_requests",
    "_errors",
    // Unit-less counts.
    "_total",
];

/// Metrics are prefixed with the executable name, e.g.
/// `metrics_backend_write_back_flush_seconds`.
static NAMESPACE: LazyLock<String> = LazyLock::new(|| {
    env::current_exe()
        .ok()
        .and_then(|path| path.file_stem()?.to_str().map(|s| s.replace('-', "_")))
        .unwrap_or_else(|| "telemetry".to_owned())
});

pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
    let const_labels = env::var("TELEMETRY_INSTANCE_NAME")
        .ok()
        .map(|instance| [("instance_name".to_owned(), instance)].into());
    Registry::new_custom(Some(NAMESPACE.clone()), const_labels)
        .expect("Failed to initialize Prometheus metrics registry")
});

const fn bytes_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i] != b[i] {
            return false;
        }
        i += 1;
    }
    true
}

const fn has_unit_suffix(name: &[u8]) -> bool {
    let mut i = 0;
    while i < UNIT_SUFFIXES.len() {
        let suffix = UNIT_SUFFIXES[i].as_bytes();
        if name.len() >= suffix.len() {
            let (_, tail) = name.split_at(name.len() - suffix.len());
            if bytes_eq(tail, suffix) {
                return true;
            }
        }
        i += 1;
    }
    false
}

/// Panics unless `name` is snake_case ASCII ending in a unit. Evaluated in a
/// const context by the registration macros, so a bad name fails the build.
pub const fn checked_metric_name(name: &'static str) -> &'static str {
    let bytes = name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == b'_') {
            panic!("Metric names may only contain lowercase alphanumerics and underscores");
        }
        i += 1;
    }
    if !has_unit_suffix(bytes) {
        panic!("Metric names must end with their unit, e.g. `_seconds` or `_total`");
    }
    name
}

pub const fn checked_metric_help(help: &'static str) -> &'static str {
    if help.is_empty() {
        panic!("Metric help strings must be nonempty");
    }
    help
}

/// Render the registry in the Prometheus text exposition format.
pub fn encode_registry() -> anyhow::Result<String> {
    let mut buffer = vec![];
    TextEncoder::new().encode(&METRICS_REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

register_telemetry_counter!(
    INVALID_METRIC_TOTAL,
    "Metric updates rejected because of mismatched labels",
    &["metric_name"]
);

static REPORTED_INVALID: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(Default::default);

/// Count a failed metric update. The first failure per metric is logged, or
/// panics under test so label mistakes surface immediately.
pub(crate) fn log_invalid_metric(name: String, error: prometheus::Error) {
    log_counter_with_labels(
        &INVALID_METRIC_TOTAL,
        1,
        vec![MetricLabel::new("metric_name", name.clone())],
    );
    let first = REPORTED_INVALID.lock().insert(name.clone());
    if !first {
        return;
    }
    let msg = format!("Failed to record metric {name:?}: {error}");
    if cfg!(any(test, feature = "testing")) {
        panic!("{msg}");
    }
    tracing::error!("{msg}");
}

#[cfg(test)]
mod tests {
    use super::{
        checked_metric_name,
        has_unit_suffix,
    };

    #[test]
    fn test_unit_suffixes() {
        assert!(has_unit_suffix(b"write_back_flush_seconds"));
        assert!(has_unit_suffix(b"ingestion_samples_received_total"));
        assert!(!has_unit_suffix(b"ingestion_latency"));
        assert!(!has_unit_suffix(b"_"));
        assert_eq!(checked_metric_name("query_rows"), "query_rows");
    }

    #[test]
    #[should_panic(expected = "end with their unit")]
    fn test_name_without_unit_is_rejected() {
        checked_metric_name("query_latency");
    }
}
