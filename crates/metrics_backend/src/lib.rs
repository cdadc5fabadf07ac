//! Wires ingestion, write-back and query into one process.
//!
//! Raw payloads enter over [`MetricsBackend::raw_sender`], pass through the
//! ingestion worker onto the processed channel and are persisted by the store
//! consumer and periodic flusher. [`MetricsBackend::router`] serves queries
//! against the same storage.

use std::{
    path::Path,
    sync::Arc,
};

use anyhow::Context as _;
use axum::{
    routing::get,
    Router,
};
use common::knobs::{
    PROCESSED_CHANNEL_CAPACITY,
    RAW_CHANNEL_CAPACITY,
};
use ingestion::{
    run_ingestion_worker,
    CardinalityConfig,
    CardinalityGuard,
    ChannelPublisher,
    InMemoryCardinalityStore,
    IngestionPipeline,
};
use metric_store::MetricStorage;
use query::{
    QueryConfig,
    QueryEngine,
};
use tokio::{
    io::{
        AsyncBufRead,
        AsyncBufReadExt,
        BufReader,
    },
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use write_back::{
    run_periodic_flusher,
    run_store_consumer,
    WriteBackBuffer,
    WriteBackConfig,
};

use crate::metrics::log_raw_line_forwarded;

pub mod config;
mod metrics;

pub struct MetricsBackend {
    raw_tx: mpsc::Sender<String>,
    engine: Arc<QueryEngine>,
    buffer: Arc<WriteBackBuffer>,
    cancel: CancellationToken,
    ingestion_worker: JoinHandle<()>,
    store_consumer: JoinHandle<()>,
    flusher: JoinHandle<()>,
}

impl MetricsBackend {
    /// Spawn the background tasks over `storage`. Must be called within a
    /// tokio runtime.
    pub fn start(storage: Arc<dyn MetricStorage>) -> Self {
        let guard = CardinalityGuard::new(
            Arc::new(InMemoryCardinalityStore::new()),
            CardinalityConfig::from_knobs(),
        );
        let (publisher, processed_rx) = ChannelPublisher::new(*PROCESSED_CHANNEL_CAPACITY);
        let pipeline = Arc::new(IngestionPipeline::new(guard, Arc::new(publisher)));
        let (raw_tx, raw_rx) = mpsc::channel(*RAW_CHANNEL_CAPACITY);

        let buffer = Arc::new(WriteBackBuffer::new(
            storage.clone(),
            WriteBackConfig::from_knobs(),
        ));
        let cancel = CancellationToken::new();
        let ingestion_worker = tokio::spawn(run_ingestion_worker(pipeline, raw_rx));
        let store_consumer = tokio::spawn(run_store_consumer(buffer.clone(), processed_rx));
        let flusher = tokio::spawn(run_periodic_flusher(buffer.clone(), cancel.clone()));

        let engine = Arc::new(QueryEngine::new(storage, QueryConfig::from_knobs()));
        Self {
            raw_tx,
            engine,
            buffer,
            cancel,
            ingestion_worker,
            store_consumer,
            flusher,
        }
    }

    pub fn raw_sender(&self) -> mpsc::Sender<String> {
        self.raw_tx.clone()
    }

    pub fn router(&self) -> Router {
        query::http::router(self.engine.clone())
            .route("/metrics", get(common::http::metrics))
    }

    /// Stop accepting payloads and persist everything already in flight. Any
    /// sender handed out by [`Self::raw_sender`] must be dropped first.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let Self {
            raw_tx,
            buffer,
            cancel,
            ingestion_worker,
            store_consumer,
            flusher,
            ..
        } = self;
        // Closing the raw channel stops the worker, which drops the publisher
        // and so closes the processed channel behind it.
        drop(raw_tx);
        ingestion_worker.await?;
        store_consumer.await?;
        cancel.cancel();
        flusher.await?;
        tracing::info!("Shut down with {} aggregates pending", buffer.pending());
        Ok(())
    }
}

/// Forward every non-blank line of `reader` to the ingestion worker. Returns
/// the number of lines sent.
pub async fn forward_raw_lines<R>(
    reader: R,
    raw_tx: mpsc::Sender<String>,
) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        raw_tx
            .send(line)
            .await
            .map_err(|_| anyhow::anyhow!("Ingestion worker is gone"))?;
        log_raw_line_forwarded();
        forwarded += 1;
    }
    Ok(forwarded)
}

/// Forward the raw input at `path`, or stdin for `-`.
pub async fn forward_raw_input(
    path: &Path,
    raw_tx: mpsc::Sender<String>,
) -> anyhow::Result<usize> {
    let forwarded = if path == Path::new("-") {
        forward_raw_lines(BufReader::new(tokio::io::stdin()), raw_tx).await?
    } else {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open raw input {}", path.display()))?;
        forward_raw_lines(BufReader::new(file), raw_tx).await?
    };
    tracing::info!("Raw input exhausted after {forwarded} payloads");
    Ok(forwarded)
}
