use std::sync::{
    atomic::{
        AtomicBool,
        Ordering,
    },
    Arc,
};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{
    DateTime,
    Utc,
};
use common::types::{
    Aggregate,
    Operation,
};
use parking_lot::Mutex;
use rusqlite::{
    params,
    Connection,
};

use crate::{
    BucketQuery,
    BucketRow,
    BucketValue,
    MetricStorage,
};

// A single connection serves every caller, so reads and writes are serialized
// behind the mutex. All connection work runs on the blocking pool.
pub struct SqliteMetricStore {
    inner: Arc<Mutex<Connection>>,
}

impl SqliteMetricStore {
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let connection =
            Connection::open(path).with_context(|| format!("Failed to open {path}"))?;
        Self::init(connection)
    }

    pub fn new_in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(connection: Connection) -> anyhow::Result<Self> {
        // Idempotent, so it runs on every open.
        connection.execute_batch(METRIC_SAMPLES_INIT)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(connection)),
        })
    }

    /// Run `f` against the connection on the blocking pool. If the returned
    /// future is dropped first, `f` observes its `cancelled` flag as set.
    async fn with_connection<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &AtomicBool) -> anyhow::Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        let cancel = CancelOnDrop::default();
        let cancelled = cancel.0.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut connection = inner.lock();
            f(&mut connection, &cancelled)
        })
        .await?;
        result
    }
}

#[cfg(any(test, feature = "testing"))]
impl SqliteMetricStore {
    /// Blocks every storage call until the guard is dropped.
    pub fn lock_connection(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.inner.lock()
    }
}

#[derive(Default)]
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetricStorage for SqliteMetricStore {
    async fn batch_insert(&self, aggregates: &[Aggregate]) -> anyhow::Result<()> {
        if aggregates.is_empty() {
            return Ok(());
        }
        let aggregates = aggregates.to_vec();
        self.with_connection(move |connection, cancelled| {
            insert_batch(connection, &aggregates, cancelled)
        })
        .await
    }

    async fn query_buckets(&self, query: &BucketQuery) -> anyhow::Result<Vec<BucketRow>> {
        let step = query.step.num_seconds().max(1);
        let from = query.from.timestamp();
        let end = query.to.timestamp() + step;
        let labels = match &query.labels {
            Some(labels) if !labels.is_empty() => Some(serde_json::to_string(labels)?),
            _ => None,
        };
        let metric_name = query.metric_name.clone();
        let operation = query.operation;

        let rows = self
            .with_connection(move |connection, _| {
                let sql = match operation {
                    Operation::Sum => SUM_BUCKETS,
                    Operation::Avg => AVG_BUCKETS,
                    Operation::Rate => RATE_BUCKETS,
                    Operation::P95 => SKETCH_BUCKETS,
                };
                let mut stmt = connection.prepare_cached(sql)?;
                let rows = stmt
                    .query_map(params![step, &metric_name, from, end, labels], |row| {
                        let value = match operation {
                            Operation::P95 => BucketValue::Sketch(row.get(1)?),
                            _ => BucketValue::Scalar(row.get(1)?),
                        };
                        Ok((row.get::<_, i64>(0)?, value))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(bucket_secs, value)| {
                Ok(BucketRow {
                    bucket_ts: from_unix_seconds(bucket_secs)?,
                    value,
                })
            })
            .collect()
    }
}

// All or nothing: the transaction rolls back on any error, including
// cancellation before the commit.
fn insert_batch(
    connection: &mut Connection,
    aggregates: &[Aggregate],
    cancelled: &AtomicBool,
) -> anyhow::Result<()> {
    let tx = connection.transaction()?;
    let mut insert_query = tx.prepare_cached(INSERT_SAMPLE)?;
    for aggregate in aggregates {
        anyhow::ensure!(
            !cancelled.load(Ordering::SeqCst),
            "Insert of {} rows cancelled",
            aggregates.len()
        );
        let labels = serde_json::to_string(&aggregate.labels)?;
        insert_query.execute(params![
            aggregate.bucket_timestamp.timestamp(),
            &aggregate.metric_name,
            <&'static str>::from(aggregate.metric_type),
            aggregate.value,
            &aggregate.sketch[..],
            labels,
        ])?;
    }
    drop(insert_query);
    anyhow::ensure!(
        !cancelled.load(Ordering::SeqCst),
        "Insert of {} rows cancelled",
        aggregates.len()
    );
    tx.commit()?;
    tracing::debug!("Inserted {} rows into metric_samples", aggregates.len());
    Ok(())
}

fn from_unix_seconds(secs: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .with_context(|| format!("Bucket timestamp {secs} out of range"))
}

const METRIC_SAMPLES_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS metric_samples (
    ts INTEGER NOT NULL,
    metric_name TEXT NOT NULL,
    metric_type TEXT NOT NULL,
    value REAL NOT NULL,
    sketch BLOB NOT NULL,
    labels TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS metric_samples_by_name_ts ON metric_samples (metric_name, ts);
"#;

const INSERT_SAMPLE: &str = r#"INSERT INTO metric_samples
    (ts, metric_name, metric_type, value, sketch, labels)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#;

// Parameters: ?1 step seconds, ?2 metric name, ?3 first bucket start,
// ?4 end of the last bucket (exclusive), ?5 label filter as a JSON object or
// NULL. A row matches the filter when every filter entry appears verbatim in
// its labels. The bucket expression floors toward negative infinity.
macro_rules! bucket_query {
    ($select:literal, $tail:literal) => {
        concat!(
            "SELECT ts - (((ts % ?1) + ?1) % ?1) AS bucket_ts, ",
            $select,
            r#"
FROM metric_samples
WHERE metric_name = ?2
    AND ts >= ?3
    AND ts < ?4
    AND (?5 IS NULL OR NOT EXISTS (
        SELECT 1 FROM json_each(?5) AS f
        WHERE NOT EXISTS (
            SELECT 1 FROM json_each(metric_samples.labels) AS l
            WHERE l.key = f.key AND l.value = f.value
        )
    ))
"#,
            $tail
        )
    };
}

const SUM_BUCKETS: &str = bucket_query!(
    "SUM(value) AS value",
    "GROUP BY bucket_ts ORDER BY bucket_ts"
);

const AVG_BUCKETS: &str = bucket_query!(
    "AVG(value) AS value",
    "GROUP BY bucket_ts ORDER BY bucket_ts"
);

const RATE_BUCKETS: &str = bucket_query!(
    "SUM(value) / CAST(?1 AS REAL) AS value",
    "GROUP BY bucket_ts ORDER BY bucket_ts"
);

const SKETCH_BUCKETS: &str = bucket_query!("sketch", "ORDER BY bucket_ts, rowid");

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{
        DateTime,
        TimeDelta,
        Utc,
    };
    use common::types::{
        Aggregate,
        Labels,
        MetricType,
        Operation,
    };
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    use super::SqliteMetricStore;
    use crate::{
        BucketQuery,
        BucketRow,
        BucketValue,
        MetricStorage,
    };

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn aggregate(bucket: &str, value: f64, labels: Labels) -> Aggregate {
        Aggregate {
            metric_name: "billing:requests".to_owned(),
            metric_type: MetricType::Counter,
            bucket_timestamp: ts(bucket),
            value,
            sketch: vec![value as u8],
            labels,
        }
    }

    fn query(operation: Operation, from: &str, to: &str, step: TimeDelta) -> BucketQuery {
        BucketQuery {
            metric_name: "billing:requests".to_owned(),
            labels: None,
            from: ts(from),
            to: ts(to),
            step,
            operation,
        }
    }

    fn scalars(rows: Vec<BucketRow>) -> Vec<(DateTime<Utc>, f64)> {
        rows.into_iter()
            .map(|row| match row.value {
                BucketValue::Scalar(v) => (row.bucket_ts, v),
                BucketValue::Sketch(_) => panic!("unexpected sketch row"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() -> anyhow::Result<()> {
        let store = SqliteMetricStore::new_in_memory()?;
        store.batch_insert(&[]).await?;
        let rows = store
            .query_buckets(&query(
                Operation::Sum,
                "2024-01-01T00:00:00Z",
                "2024-01-01T01:00:00Z",
                TimeDelta::seconds(10),
            ))
            .await?;
        assert!(rows.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_scalar_operations() -> anyhow::Result<()> {
        let store = SqliteMetricStore::new_in_memory()?;
        store
            .batch_insert(&[
                aggregate("2024-01-01T00:00:10Z", 4.0, Labels::new()),
                aggregate("2024-01-01T00:00:10Z", 6.0, Labels::new()),
                aggregate("2024-01-01T00:00:20Z", 3.0, Labels::new()),
            ])
            .await?;
        let (from, to, step) = (
            "2024-01-01T00:00:10Z",
            "2024-01-01T00:00:20Z",
            TimeDelta::seconds(10),
        );

        let sum = scalars(store.query_buckets(&query(Operation::Sum, from, to, step)).await?);
        assert_eq!(
            sum,
            vec![(ts("2024-01-01T00:00:10Z"), 10.0), (ts("2024-01-01T00:00:20Z"), 3.0)]
        );
        let avg = scalars(store.query_buckets(&query(Operation::Avg, from, to, step)).await?);
        assert_eq!(avg[0], (ts("2024-01-01T00:00:10Z"), 5.0));
        let rate = scalars(store.query_buckets(&query(Operation::Rate, from, to, step)).await?);
        assert_eq!(rate[0], (ts("2024-01-01T00:00:10Z"), 1.0));
        Ok(())
    }

    #[tokio::test]
    async fn test_last_bucket_is_read_in_full() -> anyhow::Result<()> {
        let store = SqliteMetricStore::new_in_memory()?;
        store
            .batch_insert(&[
                aggregate("2024-01-01T00:00:50Z", 100.0, Labels::new()),
                aggregate("2024-01-01T00:01:00Z", 1.0, Labels::new()),
                aggregate("2024-01-01T00:02:00Z", 2.0, Labels::new()),
                aggregate("2024-01-01T00:02:50Z", 3.0, Labels::new()),
                aggregate("2024-01-01T00:03:00Z", 100.0, Labels::new()),
            ])
            .await?;
        let rows = store
            .query_buckets(&query(
                Operation::Sum,
                "2024-01-01T00:01:00Z",
                "2024-01-01T00:02:00Z",
                TimeDelta::minutes(1),
            ))
            .await?;
        assert_eq!(
            scalars(rows),
            vec![(ts("2024-01-01T00:01:00Z"), 1.0), (ts("2024-01-01T00:02:00Z"), 5.0)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_label_filter_is_containment() -> anyhow::Result<()> {
        let store = SqliteMetricStore::new_in_memory()?;
        store
            .batch_insert(&[
                aggregate(
                    "2024-01-01T00:00:00Z",
                    1.0,
                    btreemap! {
                        "route".to_owned() => "/a".to_owned(),
                        "host".to_owned() => "x".to_owned(),
                    },
                ),
                aggregate(
                    "2024-01-01T00:00:00Z",
                    10.0,
                    btreemap! { "route".to_owned() => "/b".to_owned() },
                ),
                aggregate("2024-01-01T00:00:00Z", 100.0, Labels::new()),
            ])
            .await?;
        let base = query(
            Operation::Sum,
            "2024-01-01T00:00:00Z",
            "2024-01-01T00:00:00Z",
            TimeDelta::seconds(10),
        );

        let run = |labels: Option<Labels>| {
            let query = BucketQuery {
                labels,
                ..base.clone()
            };
            let store = &store;
            async move { anyhow::Ok(scalars(store.query_buckets(&query).await?)) }
        };
        let t0 = ts("2024-01-01T00:00:00Z");
        assert_eq!(run(None).await?, vec![(t0, 111.0)]);
        assert_eq!(run(Some(Labels::new())).await?, vec![(t0, 111.0)]);
        assert_eq!(
            run(Some(btreemap! { "route".to_owned() => "/a".to_owned() })).await?,
            vec![(t0, 1.0)]
        );
        assert_eq!(
            run(Some(btreemap! {
                "route".to_owned() => "/a".to_owned(),
                "host".to_owned() => "y".to_owned(),
            }))
            .await?,
            vec![]
        );
        assert_eq!(
            run(Some(btreemap! { "region".to_owned() => "eu".to_owned() })).await?,
            vec![]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_sketch_rows_are_not_merged() -> anyhow::Result<()> {
        let store = SqliteMetricStore::new_in_memory()?;
        store
            .batch_insert(&[
                aggregate("2024-01-01T00:00:00Z", 1.0, Labels::new()),
                aggregate("2024-01-01T00:00:10Z", 2.0, Labels::new()),
                aggregate("2024-01-01T00:00:40Z", 3.0, Labels::new()),
            ])
            .await?;
        let rows = store
            .query_buckets(&query(
                Operation::P95,
                "2024-01-01T00:00:00Z",
                "2024-01-01T00:00:30Z",
                TimeDelta::seconds(30),
            ))
            .await?;
        let t0 = ts("2024-01-01T00:00:00Z");
        assert_eq!(
            rows,
            vec![
                BucketRow {
                    bucket_ts: t0,
                    value: BucketValue::Sketch(vec![1]),
                },
                BucketRow {
                    bucket_ts: t0,
                    value: BucketValue::Sketch(vec![2]),
                },
                BucketRow {
                    bucket_ts: ts("2024-01-01T00:00:30Z"),
                    value: BucketValue::Sketch(vec![3]),
                },
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_pre_epoch_buckets_floor() -> anyhow::Result<()> {
        let store = SqliteMetricStore::new_in_memory()?;
        store
            .batch_insert(&[aggregate("1969-12-31T23:59:50Z", 7.0, Labels::new())])
            .await?;
        let rows = store
            .query_buckets(&query(
                Operation::Sum,
                "1969-12-31T23:59:00Z",
                "1969-12-31T23:59:00Z",
                TimeDelta::minutes(1),
            ))
            .await?;
        assert_eq!(scalars(rows), vec![(ts("1969-12-31T23:59:00Z"), 7.0)]);
        Ok(())
    }

    #[tokio::test]
    #[allow(clippy::await_holding_lock)]
    async fn test_insert_dropped_mid_batch_rolls_back() -> anyhow::Result<()> {
        let store = SqliteMetricStore::new_in_memory()?;
        let batch: Vec<_> = (0..1000)
            .map(|_| aggregate("2024-01-01T00:00:00Z", 1.0, Labels::new()))
            .collect();
        {
            // Hold the connection so the insert cannot start before its
            // deadline passes.
            let _connection = store.lock_connection();
            let insert = store.batch_insert(&batch);
            assert!(tokio::time::timeout(Duration::from_millis(20), insert)
                .await
                .is_err());
        }
        let rows = store
            .query_buckets(&query(
                Operation::Sum,
                "2024-01-01T00:00:00Z",
                "2024-01-01T00:00:00Z",
                TimeDelta::seconds(10),
            ))
            .await?;
        assert!(rows.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_other_metrics_are_ignored() -> anyhow::Result<()> {
        let store = SqliteMetricStore::new_in_memory()?;
        let mut other = aggregate("2024-01-01T00:00:00Z", 5.0, Labels::new());
        other.metric_name = "billing:latency".to_owned();
        store.batch_insert(&[other]).await?;
        let rows = store
            .query_buckets(&query(
                Operation::Sum,
                "2024-01-01T00:00:00Z",
                "2024-01-01T00:00:00Z",
                TimeDelta::seconds(10),
            ))
            .await?;
        assert!(rows.is_empty());
        Ok(())
    }
}
