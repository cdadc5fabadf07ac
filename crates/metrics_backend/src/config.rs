use std::{
    net::Ipv4Addr,
    path::PathBuf,
};

use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[clap(about = "Telemetry aggregation and query service")]
pub struct MetricsBackendConfig {
    /// File path for SQLite
    #[clap(env = "METRICS_DB", default_value = "metrics_backend.sqlite3")]
    pub db_spec: String,

    /// Host interface to bind to
    #[clap(short, long, env = "METRICS_INTERFACE", default_value = "0.0.0.0")]
    pub interface: Ipv4Addr,

    /// Host port daemon should bind to
    #[clap(short, long, env = "METRICS_PORT", default_value = "8080")]
    pub port: u16,

    /// Newline-delimited fetch messages to ingest. `-` reads stdin.
    #[clap(long, env = "METRICS_RAW_INPUT")]
    pub raw_input: Option<PathBuf>,
}

impl MetricsBackendConfig {
    pub fn http_bind_address(&self) -> ([u8; 4], u16) {
        (self.interface.octets(), self.port)
    }
}
