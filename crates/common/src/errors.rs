use errors::{
    ErrorMetadata,
    ErrorMetadataAnyhowExt,
};
use metrics::log_counter;
use tracing::Level;

use crate::metrics::log_errors_reported_total;

/// Error type for `main`. Converting into it reports the error, so a failed
/// service start is logged the same way as any other failure.
pub struct MainError(anyhow::Error);

impl<T: Into<anyhow::Error>> From<T> for MainError {
    fn from(e: T) -> Self {
        let err = e.into();
        report_error(&err);
        Self(err)
    }
}

impl std::fmt::Debug for MainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

/// Log an error at the level its classification calls for and bump the
/// matching counters. Every failure that ends a unit of work (a payload, a
/// flush, a query) goes through here exactly once.
pub fn report_error(err: &anyhow::Error) {
    let label = err.metric_status_label_value();
    log_errors_reported_total(label);
    if let Some(metadata) = err.downcast_ref::<ErrorMetadata>() {
        log_counter(metadata.error_counter(), 1);
    }

    let chain = format!("{err:#}").replace('\n', "\\n");
    match err.log_level() {
        Level::ERROR => tracing::error!("Caught {label} error: {chain}"),
        Level::WARN => tracing::warn!("Caught {label} error: {chain}"),
        _ => tracing::info!("Caught {label} error: {chain}"),
    }
    tracing::debug!("{err:?}");
}
