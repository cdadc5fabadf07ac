//! Tunable limits and parameters for the telemetry service.
//!
//! Every knob here should have a comment explaining what it's for and the
//! upper/lower bounds if applicable so an operator can adjust these safely.
//!
//! All knobs can be overridden with an environment variable of the same name.
#![deny(missing_docs)]

use std::{
    sync::LazyLock,
    time::Duration,
};

use cmd_util::env::{
    env_config,
    env_config_millis,
};

/// Width of the ingestion aggregation window, in seconds. Not overridable.
pub const INGESTION_WINDOW_SECONDS: i64 = 10;

/// Samples with more distinct label keys than this are rejected outright.
pub static CARDINALITY_LABEL_SIZE_LIMIT: LazyLock<usize> =
    LazyLock::new(|| env_config("CARDINALITY_LABEL_SIZE_LIMIT", 10));

/// Maximum number of distinct label combinations tracked per metric. Once a
/// metric reaches this many series, only already-known series are admitted.
pub static CARDINALITY_METRIC_SERIES_LIMIT: LazyLock<usize> =
    LazyLock::new(|| env_config("CARDINALITY_METRIC_SERIES_LIMIT", 500));

/// Upper bound on the number of aggregates written to storage by a single
/// flush. A pending queue at least this long also triggers a flush.
pub static WRITE_BACK_FLUSH_BATCH_SIZE: LazyLock<usize> =
    LazyLock::new(|| env_config("WRITE_BACK_FLUSH_BATCH_SIZE", 500));

/// A flush is triggered once this much time has passed since the previous one,
/// regardless of how many aggregates are pending.
pub static WRITE_BACK_FLUSH_INTERVAL: LazyLock<Duration> = LazyLock::new(|| {
    env_config_millis("WRITE_BACK_FLUSH_INTERVAL_MS", Duration::from_secs(2))
});

/// Deadline for one storage batch write. A write that exceeds it counts as a
/// failed flush and its batch is dropped.
pub static WRITE_BACK_FLUSH_TIMEOUT: LazyLock<Duration> = LazyLock::new(|| {
    env_config_millis("WRITE_BACK_FLUSH_TIMEOUT_MS", Duration::from_secs(10))
});

/// Deadline for the storage read behind one query request.
pub static QUERY_STORAGE_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| env_config_millis("QUERY_STORAGE_TIMEOUT_MS", Duration::from_secs(10)));

/// Largest gap-filled series a query may return. Requests whose aligned range
/// would produce more points are rejected.
pub static QUERY_MAX_POINTS: LazyLock<usize> =
    LazyLock::new(|| env_config("QUERY_MAX_POINTS", 20_000));

/// Capacity of the in-process channel carrying processed aggregates from
/// ingestion to the write-back consumer. Publishers wait when it is full.
pub static PROCESSED_CHANNEL_CAPACITY: LazyLock<usize> =
    LazyLock::new(|| env_config("PROCESSED_CHANNEL_CAPACITY", 10_000));

/// Capacity of the channel carrying raw inbound messages to the ingestion
/// worker.
pub static RAW_CHANNEL_CAPACITY: LazyLock<usize> =
    LazyLock::new(|| env_config("RAW_CHANNEL_CAPACITY", 1_000));
