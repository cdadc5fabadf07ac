use std::{
    collections::BTreeMap,
    fmt,
    str::FromStr,
};

use chrono::{
    DateTime,
    Utc,
};
use errors::ErrorMetadata;
use serde::{
    de,
    Deserialize,
    Deserializer,
    Serialize,
};
use serde_json::Value as JsonValue;

/// Label set attached to a sample. Keys are kept sorted so that every
/// rendering of the same label set is identical.
pub type Labels = BTreeMap<String, String>;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum MetricType {
    /// Monotonic non-negative increments, summed within a bucket.
    Counter,
    /// Point-in-time readings, last write wins within a bucket.
    Gauge,
}

impl<'de> Deserialize<'de> for MetricType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_case_insensitive(deserializer, &["COUNTER", "GAUGE"])
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::VariantNames,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Operation {
    Sum,
    Avg,
    Rate,
    P95,
}

impl Operation {
    /// Parse a client-supplied operation name, failing with a bad request for
    /// anything outside `SUM|AVG|RATE|P95`.
    pub fn parse_request(name: &str) -> anyhow::Result<Self> {
        name.parse().map_err(|_| {
            anyhow::anyhow!(ErrorMetadata::bad_request(
                "UnsupportedOperation",
                format!(
                    "Unsupported operation {name:?}. Expected one of {}",
                    <Operation as strum::VariantNames>::VARIANTS.join(", ")
                ),
            ))
        })
    }
}

fn deserialize_case_insensitive<'de, D, T>(
    deserializer: D,
    expected: &'static [&'static str],
) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let s = String::deserialize(deserializer)?;
    s.parse()
        .map_err(|_| de::Error::unknown_variant(&s, expected))
}

/// Canonical identity of one label combination under a metric: the metric
/// name alone when there are no labels, otherwise
/// `metric|k1=v1,k2=v2` with pairs ordered by key. `\`, `|`, `,` and `=`
/// inside the metric name, keys and values are backslash-escaped, so distinct
/// label sets never share a key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub struct SeriesKey(String);

impl SeriesKey {
    pub fn new(metric_name: &str, labels: &Labels) -> Self {
        if labels.is_empty() {
            let mut key = String::with_capacity(metric_name.len());
            push_escaped(&mut key, metric_name);
            return Self(key);
        }
        let mut key = String::with_capacity(metric_name.len() + 16 * labels.len());
        push_escaped(&mut key, metric_name);
        key.push('|');
        for (i, (k, v)) in labels.iter().enumerate() {
            if i > 0 {
                key.push(',');
            }
            push_escaped(&mut key, k);
            key.push('=');
            push_escaped(&mut key, v);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn push_escaped(key: &mut String, part: &str) {
    for c in part.chars() {
        if matches!(c, '\\' | '|' | ',' | '=') {
            key.push('\\');
        }
        key.push(c);
    }
}

/// Identifies one in-flight aggregate within an ingestion run.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AggregateKey {
    pub metric_name: String,
    pub metric_type: MetricType,
    pub aligned_timestamp: DateTime<Utc>,
    pub series_key: SeriesKey,
}

/// One reported measurement, extracted from an inbound payload.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSample {
    pub metric_name: String,
    pub metric_type: MetricType,
    pub labels: Labels,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl RawSample {
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(&self.metric_name, &self.labels)
    }
}

/// The persisted unit: all samples for one series within one ingestion window
/// of one ingestion run.
///
/// `value` is the sum of contributing samples for counters and the last one
/// applied for gauges. `sketch` is the serialized quantile sketch over every
/// contributing sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub metric_name: String,
    pub metric_type: MetricType,
    pub bucket_timestamp: DateTime<Utc>,
    pub value: f64,
    pub sketch: Vec<u8>,
    pub labels: Labels,
}

/// Envelope delivered by the upstream fetcher. `raw_payload` is expected to
/// carry a `metrics` array but is otherwise opaque.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchMessage {
    pub service_id: String,
    pub fetch_timestamp: DateTime<Utc>,
    pub raw_payload: JsonValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub ts: DateTime<Utc>,
    pub value: f64,
}

impl fmt::Display for TimeSeriesPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.ts.to_rfc3339(), self.value)
    }
}
