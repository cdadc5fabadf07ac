use std::sync::Arc;

use clap::Parser;
use cmd_util::env::config_service;
use common::{
    errors::{
        report_error,
        MainError,
    },
    http::serve_http,
};
use metric_store::SqliteMetricStore;
use metrics_backend::{
    config::MetricsBackendConfig,
    forward_raw_input,
    MetricsBackend,
};

fn main() -> Result<(), MainError> {
    let _guard = config_service();
    let config = MetricsBackendConfig::parse();
    tracing::info!("Starting metrics backend with {config:?}");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_server(config))?;
    Ok(())
}

async fn run_server(config: MetricsBackendConfig) -> anyhow::Result<()> {
    let storage = Arc::new(SqliteMetricStore::new(&config.db_spec)?);
    let backend = MetricsBackend::start(storage);

    let reader = config.raw_input.clone().map(|path| {
        let raw_tx = backend.raw_sender();
        tokio::spawn(async move {
            if let Err(e) = forward_raw_input(&path, raw_tx).await {
                report_error(&e);
            }
        })
    });

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received ctrl-c, shutting down"),
            Err(e) => tracing::error!("Failed to listen for ctrl-c: {e}"),
        }
    };
    serve_http(backend.router(), config.http_bind_address().into(), shutdown).await?;

    // Stop reading new input so the backend can drain what it already has.
    if let Some(reader) = reader {
        reader.abort();
        let _ = reader.await;
    }
    backend.shutdown().await?;
    tracing::info!("Done");
    Ok(())
}
