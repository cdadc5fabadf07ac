use std::sync::Arc;

use common::errors::report_error;
use ingestion::ProcessedMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    buffer::WriteBackBuffer,
    metrics::log_undecodable_message,
};

/// Read processed records into `buffer`, checking the flush triggers after
/// every one. Once every sender is gone the queue is drained to storage.
pub async fn run_store_consumer(
    buffer: Arc<WriteBackBuffer>,
    mut processed_rx: mpsc::Receiver<ProcessedMessage>,
) {
    while let Some(message) = processed_rx.recv().await {
        match message.decode() {
            Ok(aggregate) => {
                buffer.accept(aggregate);
                buffer.maybe_flush().await;
            },
            Err(e) => {
                log_undecodable_message();
                report_error(&e.context(format!("Undecodable record for {}", message.key)));
            },
        }
    }
    tracing::info!("Processed channel closed, draining {} aggregates", buffer.pending());
    buffer.drain().await;
}

/// Flush `buffer` on a fixed cadence until `cancel` fires. Shares the flush
/// guard with the size-triggered path.
pub async fn run_periodic_flusher(buffer: Arc<WriteBackBuffer>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(buffer.config().flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                buffer.flush().await;
            },
        }
    }
    tracing::info!("Periodic flusher stopped");
}
