//! Raw sample extraction from a [`FetchMessage`].
//!
//! A payload is extracted as a whole: if any entry of `rawPayload.metrics`
//! cannot be parsed, the payload yields no samples at all. A payload without a
//! `metrics` array yields no samples either.
use chrono::{
    DateTime,
    Utc,
};
use common::types::{
    FetchMessage,
    Labels,
    MetricType,
    RawSample,
};
use serde_json::Value as JsonValue;

use crate::metrics::{
    log_sample_rejected,
    log_samples_received,
    RejectReason,
};

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum MalformedSample {
    #[error("sample is not a JSON object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` is invalid: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

/// Samples carried by `message`, with metric names prefixed by
/// `<serviceId>:`.
pub fn extract_samples(message: &FetchMessage) -> Vec<RawSample> {
    let Some(entries) = message.raw_payload.get("metrics").and_then(JsonValue::as_array) else {
        tracing::debug!(
            "Payload from {} has no metrics array, nothing to extract",
            message.service_id
        );
        return vec![];
    };
    let samples = match entries
        .iter()
        .map(|entry| parse_sample(entry, &message.service_id))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(samples) => samples,
        Err(e) => {
            tracing::warn!(
                "Discarding payload of {} samples from {}: {e}",
                entries.len(),
                message.service_id
            );
            log_sample_rejected(RejectReason::Malformed);
            return vec![];
        },
    };
    log_samples_received(samples.len());
    samples
}

fn parse_sample(entry: &JsonValue, service_id: &str) -> Result<RawSample, MalformedSample> {
    let JsonValue::Object(fields) = entry else {
        return Err(MalformedSample::NotAnObject);
    };
    let field = |name: &'static str| {
        fields
            .get(name)
            .filter(|v| !v.is_null())
            .ok_or(MalformedSample::MissingField(name))
    };

    let metric_name = field("metricName")?
        .as_str()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| invalid("metricName", "expected a non-empty string"))?;
    let metric_type = field("metricType")?
        .as_str()
        .ok_or_else(|| invalid("metricType", "expected a string"))?
        .parse::<MetricType>()
        .map_err(|e| invalid("metricType", e.to_string()))?;
    let value = field("value")?
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid("value", "expected a finite number"))?;
    let timestamp = field("timestamp")?
        .as_str()
        .ok_or_else(|| invalid("timestamp", "expected an RFC 3339 string"))?
        .parse::<DateTime<Utc>>()
        .map_err(|e| invalid("timestamp", e.to_string()))?;
    let labels = match fields.get("labels") {
        None | Some(JsonValue::Null) => Labels::new(),
        Some(labels) => parse_labels(labels)?,
    };

    Ok(RawSample {
        metric_name: format!("{service_id}:{metric_name}"),
        metric_type,
        labels,
        value,
        timestamp,
    })
}

// Scalar label values are kept in their JSON text form; nested values are
// rejected.
fn parse_labels(labels: &JsonValue) -> Result<Labels, MalformedSample> {
    let JsonValue::Object(labels) = labels else {
        return Err(invalid("labels", "expected an object"));
    };
    labels
        .iter()
        .map(|(key, value)| {
            let value = match value {
                JsonValue::String(s) => s.clone(),
                JsonValue::Number(n) => n.to_string(),
                JsonValue::Bool(b) => b.to_string(),
                _ => return Err(invalid("labels", format!("value of `{key}` is not a scalar"))),
            };
            Ok((key.clone(), value))
        })
        .collect()
}

fn invalid(field: &'static str, reason: impl Into<String>) -> MalformedSample {
    MalformedSample::InvalidField {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use common::types::{
        FetchMessage,
        Labels,
        MetricType,
        RawSample,
    };
    use maplit::btreemap;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{
        extract_samples,
        parse_sample,
        MalformedSample,
    };

    fn message(raw_payload: serde_json::Value) -> FetchMessage {
        FetchMessage {
            service_id: "billing".to_owned(),
            fetch_timestamp: "2024-01-01T00:01:00Z".parse().unwrap(),
            raw_payload,
        }
    }

    #[test]
    fn test_extracts_and_prefixes() {
        let samples = extract_samples(&message(json!({
            "metrics": [
                {
                    "metricName": "requests",
                    "metricType": "counter",
                    "labels": { "route": "/pay", "code": 200, "cached": false },
                    "value": 3,
                    "timestamp": "2024-01-01T00:00:05Z",
                },
                {
                    "metricName": "queue_depth",
                    "metricType": "GAUGE",
                    "value": -1.5,
                    "timestamp": "2024-01-01T00:00:07.500Z",
                },
            ]
        })));
        assert_eq!(
            samples,
            vec![
                RawSample {
                    metric_name: "billing:requests".to_owned(),
                    metric_type: MetricType::Counter,
                    labels: btreemap! {
                        "route".to_owned() => "/pay".to_owned(),
                        "code".to_owned() => "200".to_owned(),
                        "cached".to_owned() => "false".to_owned(),
                    },
                    value: 3.0,
                    timestamp: "2024-01-01T00:00:05Z".parse().unwrap(),
                },
                RawSample {
                    metric_name: "billing:queue_depth".to_owned(),
                    metric_type: MetricType::Gauge,
                    labels: Labels::new(),
                    value: -1.5,
                    timestamp: "2024-01-01T00:00:07.500Z".parse().unwrap(),
                },
            ]
        );
    }

    #[test]
    fn test_missing_or_non_array_metrics_is_empty() {
        assert!(extract_samples(&message(json!({}))).is_empty());
        assert!(extract_samples(&message(json!({ "metrics": { "a": 1 } }))).is_empty());
        assert!(extract_samples(&message(json!(null))).is_empty());
        assert!(extract_samples(&message(json!("metrics"))).is_empty());
    }

    #[test]
    fn test_one_malformed_sample_empties_the_payload() {
        let ok = json!({
            "metricName": "ok",
            "metricType": "COUNTER",
            "value": 5,
            "timestamp": "2024-01-01T00:00:00Z",
        });
        assert_eq!(extract_samples(&message(json!({ "metrics": [ok.clone()] }))).len(), 1);

        for bad in [
            json!("not an object"),
            json!({ "metricName": "a", "metricType": "HISTOGRAM", "value": 1, "timestamp": "2024-01-01T00:00:00Z" }),
            json!({ "metricName": "b", "metricType": "GAUGE", "value": "1", "timestamp": "2024-01-01T00:00:00Z" }),
            json!({ "metricName": "c", "metricType": "COUNTER", "value": 1, "timestamp": "not-a-time" }),
            json!({ "metricName": "d", "metricType": "GAUGE", "value": 1, "timestamp": "2024-01-01T00:00:00Z", "labels": { "x": [1] } }),
        ] {
            let samples = extract_samples(&message(json!({ "metrics": [ok.clone(), bad.clone()] })));
            assert!(samples.is_empty(), "{bad} should empty the payload");
        }
    }

    #[test]
    fn test_parse_errors_name_the_field() {
        assert_eq!(
            parse_sample(&json!({ "metricType": "GAUGE" }), "svc"),
            Err(MalformedSample::MissingField("metricName"))
        );
        assert!(matches!(
            parse_sample(
                &json!({ "metricName": "m", "metricType": "GAUGE", "value": 1, "timestamp": 5 }),
                "svc"
            ),
            Err(MalformedSample::InvalidField {
                field: "timestamp",
                ..
            })
        ));
    }
}
