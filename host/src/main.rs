use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, Level};

use kobold_core::{BridgeConfig, ChatSession, KoboldClient};
use kobold_host::relay::{self, RelayState};
use kobold_host::supervisor::Supervisor;

#[derive(Parser, Debug)]
#[command(
    name = "kobold-host",
    about = "Native-messaging host bridging a browser extension to a local koboldcpp server"
)]
struct Args {
    /// Path to a toml config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend endpoint, e.g. http://127.0.0.1:5001
    #[arg(long)]
    endpoint: Option<String>,

    /// Conversation history file
    #[arg(long)]
    history_file: Option<PathBuf>,

    /// Log file; stdout carries the wire protocol, so logs go here
    #[arg(long, default_value = "kobold-host.log")]
    log_file: PathBuf,

    /// Directory to search for the backend executable, instead of the
    /// host binary's own directory
    #[arg(long)]
    backend_dir: Option<PathBuf>,
}

/// Logs go to a file because stdout belongs to the extension. If the file
/// cannot be opened, fall back to stderr rather than running blind.
fn init_logging(path: &PathBuf) {
    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .with_max_level(Level::INFO)
                .init();
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_max_level(Level::INFO)
                .init();
            tracing::warn!(error = %e, path = %path.display(), "could not open log file, logging to stderr");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_file);
    info!("starting kobold-host");

    let mut config = match &args.config {
        Some(path) => BridgeConfig::load_from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => BridgeConfig::load_default(),
    };
    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(history_file) = args.history_file {
        config.history_file = history_file;
    }

    let client = KoboldClient::new(&config);
    let session = Arc::new(
        ChatSession::new(&config, client.clone())
            .context("failed to open the conversation history")?,
    );

    let supervisor = Supervisor::new(
        config.backend_executables.clone(),
        config.launch_args.clone(),
        args.backend_dir,
    );
    supervisor.ensure_running();

    let (out_tx, out_rx) = mpsc::channel(256);
    tokio::spawn(relay::write_outbound(tokio::io::stdout(), out_rx));

    let state = RelayState::new(session, client, supervisor, out_tx);
    relay::run_relay(tokio::io::stdin(), state)
        .await
        .context("relay loop failed")?;

    // EOF on stdin means the browser is done with us; exit 0 immediately,
    // matching the native-messaging lifecycle.
    info!("exiting");
    Ok(())
}
