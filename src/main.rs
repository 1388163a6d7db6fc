use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scannerd::daemon::{Daemon, DaemonInfo};
use scannerd::engine::TcpConnectEngine;
use scannerd::server;
use scannerd::vts::VtCollection;

/// scannerd: scan-orchestration daemon speaking the Open Scanner Protocol.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "scannerd",
    version,
    about = "Scan-orchestration daemon speaking the Open Scanner Protocol (OSP) over XML.",
    long_about = None
)]
struct Cli {
    /// Address to listen on for OSP requests.
    #[arg(long, default_value = "127.0.0.1:1234")]
    bind: String,

    /// Path to a JSON vulnerability-test feed. Omit to start with an empty
    /// catalogue.
    #[arg(long)]
    vts_feed: Option<PathBuf>,

    /// Max concurrent TCP connect attempts per host.
    #[arg(long, default_value_t = 1000)]
    concurrency: usize,

    /// Socket connect timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 400)]
    timeout_ms: u64,

    /// Log filter, e.g. "info" or "scannerd=debug".
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log)?)
        .init();

    let vts = match &cli.vts_feed {
        Some(path) => VtCollection::load_from_path(path)?,
        None => {
            info!("no VT feed given, starting with an empty catalogue");
            VtCollection::empty()
        }
    };

    let engine = Arc::new(TcpConnectEngine::new(
        cli.concurrency,
        Duration::from_millis(cli.timeout_ms),
    ));

    let daemon = Arc::new(Daemon::new(engine, vts, DaemonInfo::default())?);
    info!(bind = %cli.bind, "scannerd starting");

    server::serve(daemon, &cli.bind).await
}
