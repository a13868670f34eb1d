//! scribe-daemon: Headless live-transcription reconciler.
//!
//! Connects to the ASR gateway, serves editor surfaces over WebSocket and
//! pushes reconciled notes to the notes service.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scribe_daemon::{AsrClient, Daemon, DaemonConfig, EditorServer, HttpBackend, Overrides};

#[derive(Parser, Debug)]
#[command(name = "scribe-daemon")]
#[command(about = "Reconcile live ASR output with human edits")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// ASR gateway WebSocket URL
    #[arg(long)]
    asr_url: Option<String>,

    /// Address to listen on for editor connections
    #[arg(short, long)]
    listen: Option<String>,

    /// Base URL of the notes service
    #[arg(long)]
    backend_url: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,scribe_daemon=debug,scribe_core=debug"
    } else {
        "info,scribe_daemon=info,scribe_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = DaemonConfig::load(args.config.as_deref())?.apply(Overrides {
        asr_url: args.asr_url,
        listen: args.listen,
        backend_url: args.backend_url,
    });

    info!("Starting scribe-daemon");
    info!("ASR gateway: {}", config.asr_url);
    info!("Notes service: {}", config.backend_url);

    let listener = EditorServer::bind(&config.listen).await?;
    let asr = AsrClient::new(config.asr_url.clone(), config.reconnect());
    let backend = Arc::new(HttpBackend::new(
        config.backend_url.clone(),
        config.backend_timeout(),
    )?);

    let daemon = Daemon::new(config.engine.clone(), asr, backend);

    info!("Press Ctrl+C to stop.");
    daemon
        .run(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
