//! Types and plumbing shared by the ingestion, write-back and query halves of
//! the telemetry service.

pub mod errors;
pub mod http;
pub mod knobs;
mod metrics;
pub mod time;
pub mod types;
