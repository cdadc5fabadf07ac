//! Admission control over the number of distinct series per metric.
//!
//! The set of known series for each metric lives in a [`CardinalityStore`]
//! shared by every concurrent ingestion run. A series, once admitted, stays
//! admitted for the lifetime of the store: the budget only ever stops *new*
//! series from being tracked.
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    sync::Arc,
};

use async_trait::async_trait;
use common::{
    knobs::{
        CARDINALITY_LABEL_SIZE_LIMIT,
        CARDINALITY_METRIC_SERIES_LIMIT,
    },
    types::{
        Labels,
        SeriesKey,
    },
};
use parking_lot::Mutex;

use crate::metrics::{
    log_sample_rejected,
    RejectReason,
};

/// Set-per-metric registry of known series.
#[async_trait]
pub trait CardinalityStore: Send + Sync + 'static {
    async fn size(&self, metric_name: &str) -> anyhow::Result<usize>;

    async fn is_member(&self, metric_name: &str, series_key: &SeriesKey) -> anyhow::Result<bool>;

    /// Atomically register `series_key`. Returns whether it was newly added.
    async fn add_if_absent(
        &self,
        metric_name: &str,
        series_key: &SeriesKey,
    ) -> anyhow::Result<bool>;
}

#[derive(Default)]
pub struct InMemoryCardinalityStore {
    series: Mutex<HashMap<String, HashSet<SeriesKey>>>,
}

impl InMemoryCardinalityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CardinalityStore for InMemoryCardinalityStore {
    async fn size(&self, metric_name: &str) -> anyhow::Result<usize> {
        Ok(self.series.lock().get(metric_name).map_or(0, HashSet::len))
    }

    async fn is_member(&self, metric_name: &str, series_key: &SeriesKey) -> anyhow::Result<bool> {
        Ok(self
            .series
            .lock()
            .get(metric_name)
            .is_some_and(|known| known.contains(series_key)))
    }

    async fn add_if_absent(
        &self,
        metric_name: &str,
        series_key: &SeriesKey,
    ) -> anyhow::Result<bool> {
        let mut series = self.series.lock();
        if let Some(known) = series.get_mut(metric_name) {
            return Ok(known.insert(series_key.clone()));
        }
        series.insert(
            metric_name.to_owned(),
            HashSet::from([series_key.clone()]),
        );
        Ok(true)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CardinalityConfig {
    /// Samples with more label keys than this are rejected.
    pub label_size_limit: usize,
    /// Distinct series tracked per metric before new ones are rejected.
    pub metric_series_limit: usize,
}

impl CardinalityConfig {
    pub fn from_knobs() -> Self {
        Self {
            label_size_limit: *CARDINALITY_LABEL_SIZE_LIMIT,
            metric_series_limit: *CARDINALITY_METRIC_SERIES_LIMIT,
        }
    }
}

#[derive(Clone)]
pub struct CardinalityGuard {
    store: Arc<dyn CardinalityStore>,
    config: CardinalityConfig,
}

impl CardinalityGuard {
    pub fn new(store: Arc<dyn CardinalityStore>, config: CardinalityConfig) -> Self {
        Self { store, config }
    }

    /// Decide whether a sample for `labels` under `metric_name` may be
    /// aggregated, registering its series if it is new and the metric is
    /// still under budget.
    ///
    /// Concurrent first sightings of different series near the limit may
    /// overshoot it by the number of racing callers.
    pub async fn admit(&self, metric_name: &str, labels: &Labels) -> anyhow::Result<bool> {
        if labels.len() > self.config.label_size_limit {
            log_sample_rejected(RejectReason::LabelLimit);
            return Ok(false);
        }
        let series_key = SeriesKey::new(metric_name, labels);
        if self.store.size(metric_name).await? >= self.config.metric_series_limit {
            if self.store.is_member(metric_name, &series_key).await? {
                return Ok(true);
            }
            tracing::debug!("Series budget exhausted for {metric_name}, rejecting {series_key}");
            log_sample_rejected(RejectReason::SeriesLimit);
            return Ok(false);
        }
        self.store.add_if_absent(metric_name, &series_key).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::types::{
        Labels,
        SeriesKey,
    };
    use maplit::btreemap;

    use super::{
        CardinalityConfig,
        CardinalityGuard,
        CardinalityStore,
        InMemoryCardinalityStore,
    };

    fn guard(
        label_size_limit: usize,
        metric_series_limit: usize,
    ) -> (CardinalityGuard, Arc<InMemoryCardinalityStore>) {
        let store = Arc::new(InMemoryCardinalityStore::new());
        let guard = CardinalityGuard::new(
            store.clone(),
            CardinalityConfig {
                label_size_limit,
                metric_series_limit,
            },
        );
        (guard, store)
    }

    fn host(i: usize) -> Labels {
        btreemap! { "host".to_owned() => format!("host-{i}") }
    }

    #[tokio::test]
    async fn test_label_limit_rejects_without_registering() -> anyhow::Result<()> {
        let (guard, store) = guard(2, 500);
        let labels: Labels = (0..3).map(|i| (format!("k{i}"), "v".to_owned())).collect();
        assert!(!guard.admit("svc:cpu", &labels).await?);
        assert_eq!(store.size("svc:cpu").await?, 0);

        let labels: Labels = (0..2).map(|i| (format!("k{i}"), "v".to_owned())).collect();
        assert!(guard.admit("svc:cpu", &labels).await?);
        assert_eq!(store.size("svc:cpu").await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_series_ceiling() -> anyhow::Result<()> {
        let (guard, store) = guard(10, 500);
        let mut admitted = 0;
        for i in 0..700 {
            if guard.admit("svc:requests", &host(i)).await? {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 500);
        assert_eq!(store.size("svc:requests").await?, 500);

        // Series admitted before the ceiling keep flowing.
        assert!(guard.admit("svc:requests", &host(0)).await?);
        assert!(guard.admit("svc:requests", &host(499)).await?);
        assert!(!guard.admit("svc:requests", &host(500)).await?);

        // The budget is per metric.
        assert!(guard.admit("svc:latency", &host(600)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_series_counts_once() -> anyhow::Result<()> {
        let (guard, store) = guard(10, 2);
        let labels = btreemap! {
            "b".to_owned() => "2".to_owned(),
            "a".to_owned() => "1".to_owned(),
        };
        for _ in 0..5 {
            assert!(guard.admit("svc:cpu", &labels).await?);
        }
        assert!(guard.admit("svc:cpu", &Labels::new()).await?);
        assert_eq!(store.size("svc:cpu").await?, 2);
        assert!(
            store
                .is_member("svc:cpu", &SeriesKey::new("svc:cpu", &labels))
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_add_if_absent_reports_new_series() -> anyhow::Result<()> {
        let store = InMemoryCardinalityStore::new();
        let key = SeriesKey::new("svc:cpu", &host(1));
        assert!(store.add_if_absent("svc:cpu", &key).await?);
        assert!(!store.add_if_absent("svc:cpu", &key).await?);
        assert!(!store.is_member("svc:mem", &key).await?);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admission_of_one_series() -> anyhow::Result<()> {
        let (guard, store) = guard(10, 1);
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let guard = guard.clone();
                tokio::spawn(async move { guard.admit("svc:cpu", &host(7)).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await??);
        }
        assert_eq!(store.size("svc:cpu").await?, 1);
        Ok(())
    }
}
