use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    sync::Arc,
    time::Duration,
};

use chrono::{
    DateTime,
    Utc,
};
use common::{
    knobs::{
        QUERY_MAX_POINTS,
        QUERY_STORAGE_TIMEOUT,
    },
    time::{
        align_down,
        bucket_count,
        bucket_starts,
        choose_step,
    },
    types::{
        Labels,
        Operation,
        TimeSeriesPoint,
    },
};
use errors::ErrorMetadata;
use metric_store::{
    BucketQuery,
    BucketRow,
    BucketValue,
    MetricStorage,
};
use sketch::{
    HdrSketch,
    QuantileSketch,
};

use crate::metrics::{
    execute_timer,
    log_corrupt_sketch,
};

const PERCENTILE: f64 = 0.95;

#[derive(Clone, Copy, Debug)]
pub struct QueryConfig {
    /// Largest gap-filled series a single query may produce.
    pub max_points: usize,
    pub storage_timeout: Duration,
}

impl QueryConfig {
    pub fn from_knobs() -> Self {
        Self {
            max_points: *QUERY_MAX_POINTS,
            storage_timeout: *QUERY_STORAGE_TIMEOUT,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryRequest {
    pub metric_name: String,
    pub operation: Operation,
    pub labels: Option<Labels>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

pub struct QueryEngine {
    storage: Arc<dyn MetricStorage>,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(storage: Arc<dyn MetricStorage>, config: QueryConfig) -> Self {
        Self { storage, config }
    }

    /// Re-aggregate stored buckets into one point per step-aligned instant in
    /// `[from, to]`. Buckets without data are 0.
    pub async fn execute(&self, request: QueryRequest) -> anyhow::Result<Vec<TimeSeriesPoint>> {
        let timer = execute_timer(request.operation);
        if request.from > request.to {
            anyhow::bail!(ErrorMetadata::bad_request(
                "InvalidTimeRange",
                format!(
                    "`from` ({}) must not be after `to` ({})",
                    request.from.to_rfc3339(),
                    request.to.to_rfc3339()
                ),
            ));
        }
        let step = choose_step(request.to - request.from);
        let from = align_down(request.from, step);
        let to = align_down(request.to, step);
        let points = bucket_count(from, to, step);
        if points > self.config.max_points {
            anyhow::bail!(ErrorMetadata::bad_request(
                "TooManyBuckets",
                format!(
                    "Query would return {points} points, more than the limit of {}",
                    self.config.max_points
                ),
            ));
        }

        let query = BucketQuery {
            metric_name: request.metric_name,
            labels: request.labels,
            from,
            to,
            step,
            operation: request.operation,
        };
        let rows = tokio::time::timeout(
            self.config.storage_timeout,
            self.storage.query_buckets(&query),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!(ErrorMetadata::overloaded(
                "QueryTimeout",
                "Reading stored metrics took too long. Try a narrower time range.",
            ))
        })??;
        tracing::debug!(
            "Query {} {} over [{from}, {to}] step {step}: {} rows",
            query.operation,
            query.metric_name,
            rows.len()
        );

        let values = bucket_values(rows);
        let series = bucket_starts(from, to, step)
            .map(|ts| TimeSeriesPoint {
                ts,
                value: values.get(&ts).copied().unwrap_or(0.0),
            })
            .collect();
        timer.finish();
        Ok(series)
    }
}

/// Reduce storage rows to one value per bucket. Sketch rows of the same bucket
/// are merged and read at the 95th percentile.
fn bucket_values(rows: Vec<BucketRow>) -> HashMap<DateTime<Utc>, f64> {
    let mut values = HashMap::new();
    let mut sketches: BTreeMap<DateTime<Utc>, Option<HdrSketch>> = BTreeMap::new();
    for row in rows {
        match row.value {
            BucketValue::Scalar(value) => {
                values.insert(row.bucket_ts, value);
            },
            BucketValue::Sketch(bytes) => {
                let merged = sketches.entry(row.bucket_ts).or_default();
                if bytes.is_empty() {
                    continue;
                }
                let sketch = match HdrSketch::from_bytes(&bytes) {
                    Ok(sketch) => sketch,
                    Err(e) => {
                        tracing::warn!(
                            "Skipping undecodable sketch in bucket {}: {e}",
                            row.bucket_ts
                        );
                        log_corrupt_sketch();
                        continue;
                    },
                };
                match merged {
                    Some(merged) => {
                        if let Err(e) = merged.merge(&sketch) {
                            tracing::warn!(
                                "Failed to merge sketch in bucket {}: {e}",
                                row.bucket_ts
                            );
                            log_corrupt_sketch();
                        }
                    },
                    None => *merged = Some(sketch),
                }
            },
        }
    }
    for (ts, merged) in sketches {
        let value = merged
            .map(|sketch| sketch.quantile(PERCENTILE))
            .filter(|q| q.is_finite())
            .unwrap_or(0.0);
        values.insert(ts, value);
    }
    values
}
