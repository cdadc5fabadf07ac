use std::collections::HashMap;

use prometheus::{
    core::Collector,
    Gauge,
    HistogramVec,
    IntCounter,
    IntCounterVec,
};

use crate::{
    registry::log_invalid_metric,
    MetricLabel,
};

pub fn log_counter(counter: &IntCounter, increment: u64) {
    counter.inc_by(increment);
}

pub fn log_counter_with_labels(
    counter: &IntCounterVec,
    increment: u64,
    labels: Vec<MetricLabel>,
) {
    match counter.get_metric_with(&label_map(&labels)) {
        Ok(metric) => metric.inc_by(increment),
        Err(e) => log_invalid_metric(metric_name(counter), e),
    }
}

pub fn log_gauge(gauge: &Gauge, value: f64) {
    gauge.set(value);
}

pub(crate) fn observe_with_labels(histogram: &HistogramVec, value: f64, labels: &[MetricLabel]) {
    match histogram.get_metric_with(&label_map(labels)) {
        Ok(metric) => metric.observe(value),
        Err(e) => log_invalid_metric(metric_name(histogram), e),
    }
}

fn label_map(labels: &[MetricLabel]) -> HashMap<&str, &str> {
    labels
        .iter()
        .map(|label| (label.key, label.value.as_ref()))
        .collect()
}

/// Fully qualified name of `metric`, namespace included.
pub(crate) fn metric_name<M: Collector>(metric: &M) -> String {
    metric
        .desc()
        .first()
        .map(|desc| desc.fq_name.clone())
        .unwrap_or_else(|| "unknown".to_owned())
}

#[cfg(test)]
mod tests {
    use crate::{
        encode_registry,
        log_counter_with_labels,
        register_telemetry_counter,
        MetricLabel,
    };

    register_telemetry_counter!(
        RECORD_TEST_EVENTS_TOTAL,
        "Events recorded by the record test",
        &["kind"]
    );

    #[test]
    fn test_labeled_counter_is_encoded() -> anyhow::Result<()> {
        log_counter_with_labels(
            &RECORD_TEST_EVENTS_TOTAL,
            3,
            vec![MetricLabel::new("kind", "widget")],
        );
        let text = encode_registry()?;
        let line = text
            .lines()
            .find(|l| l.contains("record_test_events_total{") && l.contains("widget"))
            .expect("counter missing from exposition");
        assert!(line.ends_with(" 3"), "{line}");
        Ok(())
    }

    #[test]
    #[should_panic(expected = "Failed to record metric")]
    fn test_mismatched_labels_panic_under_test() {
        log_counter_with_labels(
            &RECORD_TEST_EVENTS_TOTAL,
            1,
            vec![MetricLabel::new("colour", "blue")],
        );
    }
}
