use std::sync::Arc;

use anyhow::Context as _;
use common::{
    errors::report_error,
    types::{
        Aggregate,
        FetchMessage,
        MetricType,
    },
};
use sketch::HdrSketch;
use tokio::sync::mpsc;

use crate::{
    aggregator::WindowedAggregator,
    cardinality::CardinalityGuard,
    extract::extract_samples,
    metrics::{
        handle_message_timer,
        log_aggregates_emitted,
        log_payload_failure,
        log_publish_failure,
        log_sample_admitted,
        log_sample_rejected,
        RejectReason,
    },
    publisher::ProcessedPublisher,
    IngestionError,
};

/// Turns one inbound payload into aggregates and publishes them.
pub struct IngestionPipeline {
    guard: CardinalityGuard,
    publisher: Arc<dyn ProcessedPublisher>,
}

impl IngestionPipeline {
    pub fn new(guard: CardinalityGuard, publisher: Arc<dyn ProcessedPublisher>) -> Self {
        Self { guard, publisher }
    }

    /// Extract, filter, admit and aggregate the samples of `message`. Nothing
    /// is published, so a failure here leaves no partial output.
    pub async fn process(&self, message: &FetchMessage) -> anyhow::Result<Vec<Aggregate>> {
        let mut aggregator = WindowedAggregator::<HdrSketch>::new();
        for sample in extract_samples(message) {
            if sample.metric_type == MetricType::Counter && sample.value <= 0.0 {
                log_sample_rejected(RejectReason::NonPositiveCounter);
                continue;
            }
            if !self.guard.admit(&sample.metric_name, &sample.labels).await? {
                continue;
            }
            log_sample_admitted();
            aggregator.aggregate(sample);
        }
        Ok(aggregator.finish()?)
    }

    /// Handle one raw payload end to end. Returns the number of aggregates
    /// published.
    ///
    /// Every aggregate is offered to the publisher even if an earlier one
    /// failed; the first failure is returned.
    pub async fn handle_message(&self, raw: &str) -> Result<usize, IngestionError> {
        let timer = handle_message_timer();
        let processing = |source| {
            log_payload_failure();
            IngestionError::Processing {
                message: raw.to_owned(),
                source,
            }
        };
        let message: FetchMessage = serde_json::from_str(raw)
            .context("Invalid fetch message envelope")
            .map_err(processing)?;
        tracing::debug!(
            "Received payload from {} fetched at {}",
            message.service_id,
            message.fetch_timestamp
        );
        let aggregates = self.process(&message).await.map_err(processing)?;

        let mut first_failure = None;
        let mut failed = 0;
        for aggregate in &aggregates {
            if let Err(source) = self.publisher.publish(aggregate).await {
                log_publish_failure();
                failed += 1;
                first_failure.get_or_insert((aggregate.metric_name.clone(), source));
            }
        }
        log_aggregates_emitted(aggregates.len() - failed);
        if let Some((metric_name, source)) = first_failure {
            return Err(IngestionError::Publish {
                metric_name,
                failed,
                source,
            });
        }
        timer.finish();
        Ok(aggregates.len())
    }
}

/// Drain raw payloads from `raw_rx` until every sender is gone. Failures are
/// reported and do not stop the worker.
pub async fn run_ingestion_worker(
    pipeline: Arc<IngestionPipeline>,
    mut raw_rx: mpsc::Receiver<String>,
) {
    while let Some(raw) = raw_rx.recv().await {
        match pipeline.handle_message(&raw).await {
            Ok(published) => tracing::debug!("Published {published} aggregates"),
            Err(e) => report_error(&e.into()),
        }
    }
    tracing::info!("Raw channel closed, ingestion worker exiting");
}
