//! # panocast Tile Server
//!
//! Accepts client connections over TCP and serves tiles from a directory
//! store, one session per connection.
//!
//! ## Usage
//!
//! ```bash
//! panocast-server --tiles-dir ./tiles
//!
//! # Weighted fair queueing, custom listen address
//! panocast-server --config wfq.toml --listen 0.0.0.0:4433 --tiles-dir ./tiles
//! ```
//!
//! Tiles are looked up as `<tiles-dir>/<bitrate>/seg<segment>_tile<tile>.m4s`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;

use panocast_common::{DirTileStore, SessionConfig, TileStore};

#[derive(Parser, Debug)]
#[command(name = "panocast-server", about = "Viewport-adaptive tile server")]
struct Cli {
    /// Path to a TOML session config. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to accept client connections on.
    #[arg(long, default_value = "0.0.0.0:4433")]
    listen: SocketAddr,

    /// Root of the tile directory store.
    #[arg(long)]
    tiles_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();

    // ── Config ──────────────────────────────────────────────────
    let config = match &cli.config {
        Some(path) => SessionConfig::from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    let config = Arc::new(config);

    anyhow::ensure!(
        cli.tiles_dir.is_dir(),
        "tile directory {} does not exist",
        cli.tiles_dir.display()
    );
    let store: Arc<dyn TileStore> = Arc::new(DirTileStore::new(&cli.tiles_dir));

    let listener = TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    tracing::info!(
        listen = %cli.listen,
        tiles_dir = %cli.tiles_dir.display(),
        discipline = ?config.scheduler.discipline,
        "panocast-server starting"
    );

    // ── Accept loop ─────────────────────────────────────────────
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted.context("accepting connection")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down...");
                break;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "set_nodelay failed");
        }

        let store = store.clone();
        let config = config.clone();
        tokio::spawn(async move {
            match panocast_server::serve(stream, store, &config).await {
                Ok(report) => tracing::info!(
                    %peer,
                    client_id = %report.client_id,
                    served = report.stats.served(),
                    discarded = report.stats.discarded,
                    "connection closed"
                ),
                Err(e) => tracing::warn!(%peer, error = %e, "session failed"),
            }
        });
    }

    Ok(())
}
