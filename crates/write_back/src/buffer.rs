use std::{
    sync::Arc,
    time::Duration,
};

use common::{
    errors::report_error,
    knobs::{
        WRITE_BACK_FLUSH_BATCH_SIZE,
        WRITE_BACK_FLUSH_INTERVAL,
        WRITE_BACK_FLUSH_TIMEOUT,
    },
    types::Aggregate,
};
use crossbeam_channel::{
    Receiver,
    Sender,
};
use metric_store::MetricStorage;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::metrics::{
    flush_timer,
    log_dropped,
    log_flushed,
    log_pending,
};

#[derive(Clone, Copy, Debug)]
pub struct WriteBackConfig {
    /// Most aggregates written by one flush. A queue this long is due.
    pub batch_size: usize,
    /// A queue is due once this long has passed since the last flush.
    pub flush_interval: Duration,
    /// Deadline for one storage write.
    pub flush_timeout: Duration,
}

impl WriteBackConfig {
    pub fn from_knobs() -> Self {
        Self {
            batch_size: *WRITE_BACK_FLUSH_BATCH_SIZE,
            flush_interval: *WRITE_BACK_FLUSH_INTERVAL,
            flush_timeout: *WRITE_BACK_FLUSH_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending.
    Empty,
    Flushed(usize),
    /// The write failed or timed out and the batch was discarded.
    Dropped(usize),
}

/// Queue of aggregates awaiting persistence.
///
/// Delivery to storage is at most once: a batch whose write fails is reported
/// and discarded, never re-queued. Flushes are serialized so a drained item
/// belongs to exactly one batch, while [`Self::accept`] never waits on a
/// flush.
pub struct WriteBackBuffer {
    storage: Arc<dyn MetricStorage>,
    config: WriteBackConfig,
    pending_tx: Sender<Aggregate>,
    pending_rx: Receiver<Aggregate>,
    last_flush: Mutex<Instant>,
    flush_lock: tokio::sync::Mutex<()>,
}

impl WriteBackBuffer {
    pub fn new(storage: Arc<dyn MetricStorage>, config: WriteBackConfig) -> Self {
        let (pending_tx, pending_rx) = crossbeam_channel::unbounded();
        Self {
            storage,
            config,
            pending_tx,
            pending_rx,
            last_flush: Mutex::new(Instant::now()),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &WriteBackConfig {
        &self.config
    }

    pub fn accept(&self, aggregate: Aggregate) {
        // We hold the receiver, so the channel can't be disconnected.
        if self.pending_tx.send(aggregate).is_err() {
            tracing::error!("Write-back queue disconnected, dropping aggregate");
            log_dropped(1);
            return;
        }
        log_pending(self.pending_rx.len());
    }

    pub fn pending(&self) -> usize {
        self.pending_rx.len()
    }

    pub fn should_flush(&self) -> bool {
        self.pending_rx.len() >= self.config.batch_size
            || self.last_flush.lock().elapsed() > self.config.flush_interval
    }

    /// Write up to one batch, waiting for any flush already in progress.
    pub async fn flush(&self) -> FlushOutcome {
        let _guard = self.flush_lock.lock().await;
        self.flush_locked().await
    }

    /// Flush if a trigger has fired and no other flush is running. Returns
    /// `None` when nothing was attempted.
    pub async fn maybe_flush(&self) -> Option<FlushOutcome> {
        if !self.should_flush() {
            return None;
        }
        let _guard = self.flush_lock.try_lock().ok()?;
        Some(self.flush_locked().await)
    }

    /// Flush batch after batch until the queue is empty. Used on shutdown.
    pub async fn drain(&self) {
        let _guard = self.flush_lock.lock().await;
        while self.flush_locked().await != FlushOutcome::Empty {}
    }

    async fn flush_locked(&self) -> FlushOutcome {
        let batch: Vec<_> = self
            .pending_rx
            .try_iter()
            .take(self.config.batch_size)
            .collect();
        *self.last_flush.lock() = Instant::now();
        log_pending(self.pending_rx.len());
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let timer = flush_timer();
        let result = tokio::time::timeout(
            self.config.flush_timeout,
            self.storage.batch_insert(&batch),
        )
        .await
        .unwrap_or_else(|_| {
            Err(anyhow::anyhow!(
                "Storage write timed out after {:?}",
                self.config.flush_timeout
            ))
        });
        match result {
            Ok(()) => {
                timer.finish();
                tracing::info!("Flushed {} aggregates to storage", batch.len());
                log_flushed(batch.len());
                FlushOutcome::Flushed(batch.len())
            },
            Err(e) => {
                let e = e.context(format!("Dropping batch of {} aggregates", batch.len()));
                report_error(&e);
                log_dropped(batch.len());
                FlushOutcome::Dropped(batch.len())
            },
        }
    }
}
