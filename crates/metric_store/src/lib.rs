//! Persistence for aggregates: batched writes from the write-back path and
//! bucketed reads for the query engine.
use async_trait::async_trait;
use chrono::{
    DateTime,
    TimeDelta,
    Utc,
};
use common::types::{
    Aggregate,
    Labels,
    Operation,
};

mod sqlite;

pub use crate::sqlite::SqliteMetricStore;

/// A bucketed read over stored aggregates.
#[derive(Clone, Debug, PartialEq)]
pub struct BucketQuery {
    pub metric_name: String,
    /// Rows must carry every one of these labels. `None` or an empty map
    /// matches all rows for the metric.
    pub labels: Option<Labels>,
    /// Start of the first bucket, aligned to `step`.
    pub from: DateTime<Utc>,
    /// Start of the last bucket, aligned to `step`. That bucket is read in
    /// full.
    pub to: DateTime<Utc>,
    pub step: TimeDelta,
    pub operation: Operation,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BucketValue {
    /// Value already reduced by storage for `SUM`, `AVG` and `RATE`.
    Scalar(f64),
    /// Sketch bytes of one stored row. `P95` yields one of these per row and
    /// leaves the merge to the caller.
    Sketch(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct BucketRow {
    pub bucket_ts: DateTime<Utc>,
    pub value: BucketValue,
}

#[async_trait]
pub trait MetricStorage: Send + Sync + 'static {
    /// Persist `aggregates` as one row each. All rows are written or none are.
    /// An empty batch is a no-op.
    async fn batch_insert(&self, aggregates: &[Aggregate]) -> anyhow::Result<()>;

    /// Rows ordered by bucket start. Buckets with no matching rows are absent.
    async fn query_buckets(&self, query: &BucketQuery) -> anyhow::Result<Vec<BucketRow>>;
}
