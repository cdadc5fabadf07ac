//! Read side of the service. [`QueryEngine`] re-aggregates stored buckets at a
//! resolution chosen from the requested range and zero-fills the gaps;
//! [`http::router`] exposes it as `POST /query`.

pub mod engine;
pub mod http;
mod metrics;

pub use crate::engine::{
    QueryConfig,
    QueryEngine,
    QueryRequest,
};
