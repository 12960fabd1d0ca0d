//! Fieldrelay Server
//!
//! Run with: cargo run --bin fieldrelay
//!
//! # Configuration
//!
//! Reads `--config <path>` when given, otherwise the first of
//! `~/.config/fieldrelay/config.toml`, `/etc/fieldrelay/config.toml` and
//! `./config.toml`. Environment variables override file settings:
//! - `FIELDRELAY_HOST`: Host to bind to (default: 0.0.0.0)
//! - `FIELDRELAY_PORT`: Port to listen on (default: 3000)
//! - `FIELDRELAY_STORAGE_BACKEND`: `sqlite` or `memory` (default: sqlite)
//! - `FIELDRELAY_DB_PATH`: SQLite database file
//! - `FIELDRELAY_LOG_LEVEL` / `FIELDRELAY_LOG_FORMAT`: logging
//! - `RUST_LOG`: Full filter override

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use fieldrelay::api::{serve, AppState};
use fieldrelay::config::{generate_default_config, Config};
use fieldrelay::logging::init_tracing;
use fieldrelay::storage::open_store;

#[derive(Parser)]
#[command(name = "fieldrelay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-time telemetry relay for field irrigation controllers")]
struct Args {
    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a default config file and exit
    #[arg(long)]
    print_config: bool,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load_default(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config.logging).context("installing tracing subscriber")?;

    tracing::info!("Starting Fieldrelay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        backend = %config.storage.backend,
        db_path = %config.storage.db_path,
        "Opening reading store"
    );

    let store = open_store(&config.storage).context("opening reading store")?;
    let state = AppState::new(store, config.server.clone());

    serve(state, &config.server).await?;

    tracing::info!("Fieldrelay stopped");
    Ok(())
}
