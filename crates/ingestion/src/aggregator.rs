use std::collections::{
    hash_map::Entry,
    HashMap,
};

use chrono::{
    DateTime,
    Utc,
};
use common::{
    time::{
        align_down,
        ingestion_window,
    },
    types::{
        Aggregate,
        AggregateKey,
        Labels,
        MetricType,
        RawSample,
    },
};
use sketch::{
    HdrSketch,
    QuantileSketch,
    SketchError,
};

/// An aggregate still being folded into. The sketch stays deserialized until
/// the run finishes.
struct PendingAggregate<S> {
    metric_name: String,
    metric_type: MetricType,
    bucket_timestamp: DateTime<Utc>,
    value: f64,
    labels: Labels,
    sketch: S,
}

/// Folds the samples of one ingestion run into one aggregate per
/// [`AggregateKey`]. Not shared between runs.
pub struct WindowedAggregator<S = HdrSketch> {
    index: HashMap<AggregateKey, usize>,
    pending: Vec<PendingAggregate<S>>,
}

impl<S: QuantileSketch> WindowedAggregator<S> {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn aggregate(&mut self, sample: RawSample) {
        let aligned_timestamp = align_down(sample.timestamp, ingestion_window());
        let key = AggregateKey {
            series_key: sample.series_key(),
            metric_name: sample.metric_name.clone(),
            metric_type: sample.metric_type,
            aligned_timestamp,
        };
        match self.index.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(self.pending.len());
                self.pending.push(PendingAggregate {
                    metric_name: sample.metric_name,
                    metric_type: sample.metric_type,
                    bucket_timestamp: aligned_timestamp,
                    value: sample.value,
                    labels: sample.labels,
                    sketch: S::of_value(sample.value),
                });
            },
            Entry::Occupied(entry) => {
                let existing = &mut self.pending[*entry.get()];
                existing.value = match existing.metric_type {
                    MetricType::Counter => existing.value + sample.value,
                    MetricType::Gauge => sample.value,
                };
                existing.sketch.add(sample.value);
            },
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Every aggregate of the run, in the order their keys were first seen.
    pub fn finish(self) -> Result<Vec<Aggregate>, SketchError> {
        self.pending
            .into_iter()
            .map(|pending| {
                Ok(Aggregate {
                    sketch: pending.sketch.to_bytes()?,
                    metric_name: pending.metric_name,
                    metric_type: pending.metric_type,
                    bucket_timestamp: pending.bucket_timestamp,
                    value: pending.value,
                    labels: pending.labels,
                })
            })
            .collect()
    }
}
