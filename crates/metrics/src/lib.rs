//! Prometheus instrumentation shared by every crate in the service.
//!
//! Each crate keeps its metric statics in a private `metrics` module, declared
//! with the `register_telemetry_*` macros, and exposes one small `log_*`
//! function per event. Everything lands in [`METRICS_REGISTRY`], which the
//! server renders on `GET /metrics`.

mod labels;
mod macros;
mod record;
mod registry;
mod timer;

pub use crate::{
    labels::{
        MetricLabel,
        STATUS_LABEL,
    },
    macros::*,
    record::{
        log_counter,
        log_counter_with_labels,
        log_gauge,
    },
    registry::{
        checked_metric_help,
        checked_metric_name,
        encode_registry,
        METRICS_REGISTRY,
    },
    timer::StatusTimer,
};
