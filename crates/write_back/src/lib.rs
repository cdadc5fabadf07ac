//! The persistence half of the service: processed aggregates are queued in a
//! [`WriteBackBuffer`] and written to storage in bounded batches, either when
//! enough are pending or when the flush interval elapses.

mod buffer;
mod consumer;
mod metrics;

pub use crate::{
    buffer::{
        FlushOutcome,
        WriteBackBuffer,
        WriteBackConfig,
    },
    consumer::{
        run_periodic_flusher,
        run_store_consumer,
    },
};
