//! The ingestion half of the service: raw payloads in, windowed aggregates out
//! on the processed channel.
//!
//! A payload flows through [`extract::extract_samples`], the
//! [`cardinality::CardinalityGuard`] and a per-run
//! [`aggregator::WindowedAggregator`] before each resulting aggregate is handed
//! to a [`publisher::ProcessedPublisher`]. [`pipeline::IngestionPipeline`]
//! ties these together.

pub mod aggregator;
pub mod cardinality;
pub mod extract;
mod metrics;
pub mod pipeline;
pub mod publisher;

pub use crate::{
    cardinality::{
        CardinalityConfig,
        CardinalityGuard,
        CardinalityStore,
        InMemoryCardinalityStore,
    },
    pipeline::{
        run_ingestion_worker,
        IngestionPipeline,
    },
    publisher::{
        ChannelPublisher,
        ProcessedMessage,
        ProcessedPublisher,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    /// The payload as a whole could not be processed. `message` is the raw
    /// payload so it can be replayed.
    #[error("Failed to process payload: {message}")]
    Processing {
        message: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to publish {failed} aggregates, first for {metric_name}")]
    Publish {
        metric_name: String,
        failed: usize,
        #[source]
        source: anyhow::Error,
    },
}
