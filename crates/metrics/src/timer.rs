use std::{
    collections::BTreeSet,
    time::{
        Duration,
        Instant,
    },
};

use prometheus::HistogramVec;

use crate::{
    record::{
        metric_name,
        observe_with_labels,
    },
    MetricLabel,
};

/// Records elapsed seconds into `histogram` on drop. The status label is
/// `error` unless [`StatusTimer::finish`] is called.
pub struct StatusTimer {
    start: Instant,
    histogram: &'static HistogramVec,
    labels: BTreeSet<MetricLabel>,
}

impl StatusTimer {
    pub fn new(histogram: &'static HistogramVec) -> Self {
        Self {
            start: Instant::now(),
            histogram,
            labels: BTreeSet::from([MetricLabel::STATUS_ERROR]),
        }
    }

    pub fn add_label(&mut self, label: MetricLabel) {
        self.labels.retain(|l| l.key != label.key);
        self.labels.insert(label);
    }

    /// Stop the timer with status `success`.
    pub fn finish(mut self) -> Duration {
        self.add_label(MetricLabel::STATUS_SUCCESS);
        self.start.elapsed()
    }
}

impl Drop for StatusTimer {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let elapsed = self.start.elapsed();
        tracing::debug!(
            "{elapsed:?} for timer {} {:?}",
            metric_name(self.histogram),
            self.labels
        );
        let labels: Vec<_> = std::mem::take(&mut self.labels).into_iter().collect();
        observe_with_labels(self.histogram, elapsed.as_secs_f64(), &labels);
    }
}
