//! Bucket alignment shared by ingestion (fixed window) and query (variable
//! step).
use chrono::{
    DateTime,
    TimeDelta,
    Utc,
};

use crate::knobs::INGESTION_WINDOW_SECONDS;

pub fn ingestion_window() -> TimeDelta {
    TimeDelta::seconds(INGESTION_WINDOW_SECONDS)
}

/// Floor `ts` to a multiple of `step` since the epoch. Sub-second precision is
/// discarded. Pre-epoch instants round toward negative infinity.
pub fn align_down(ts: DateTime<Utc>, step: TimeDelta) -> DateTime<Utc> {
    let step_seconds = step.num_seconds().max(1);
    let seconds = ts.timestamp();
    let offset = seconds.rem_euclid(step_seconds);
    ts - TimeDelta::seconds(offset) - TimeDelta::nanoseconds(ts.timestamp_subsec_nanos() as i64)
}

/// Resolution for a query over `range`: 10s up to an hour, 30s up to six
/// hours, 1min up to a day and 5min beyond that.
pub fn choose_step(range: TimeDelta) -> TimeDelta {
    if range <= TimeDelta::hours(1) {
        TimeDelta::seconds(10)
    } else if range <= TimeDelta::hours(6) {
        TimeDelta::seconds(30)
    } else if range <= TimeDelta::hours(24) {
        TimeDelta::minutes(1)
    } else {
        TimeDelta::minutes(5)
    }
}

/// Number of step-aligned instants in `[aligned_from, aligned_to]`.
pub fn bucket_count(
    aligned_from: DateTime<Utc>,
    aligned_to: DateTime<Utc>,
    step: TimeDelta,
) -> usize {
    if aligned_to < aligned_from {
        return 0;
    }
    let span = (aligned_to - aligned_from).num_seconds();
    (span / step.num_seconds().max(1)) as usize + 1
}

/// Every step-aligned instant from `aligned_from` to `aligned_to` inclusive, in
/// increasing order.
pub fn bucket_starts(
    aligned_from: DateTime<Utc>,
    aligned_to: DateTime<Utc>,
    step: TimeDelta,
) -> impl Iterator<Item = DateTime<Utc>> {
    let count = bucket_count(aligned_from, aligned_to, step);
    (0..count).map(move |i| nth_bucket_start(aligned_from, step, i))
}

fn nth_bucket_start(aligned_from: DateTime<Utc>, step: TimeDelta, n: usize) -> DateTime<Utc> {
    aligned_from + TimeDelta::seconds(step.num_seconds().max(1) * n as i64)
}
