//! # panocast Viewer Client
//!
//! Connects to a panocast server over TCP, replays a viewport trace and
//! prints a QoE summary as JSON.
//!
//! ## Usage
//!
//! ```bash
//! panocast-client --connect 127.0.0.1:4433 --trace user_input.csv --out-dir ./client_tiles
//!
//! # basic2 ABR, summary written to a file
//! panocast-client --config basic2.toml --connect 127.0.0.1:4433 \
//!   --trace user_input.csv --out-dir ./client_tiles --summary summary.json
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpStream;

use panocast_client::ViewportTrace;
use panocast_common::{DirTileStore, SessionConfig, TileStore};

#[derive(Parser, Debug)]
#[command(name = "panocast-client", about = "Viewport-adaptive tile client")]
struct Cli {
    /// Path to a TOML session config. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server address.
    #[arg(long, default_value = "127.0.0.1:4433")]
    connect: SocketAddr,

    /// Viewport trace CSV (`frame,tile,tile,...` per row).
    #[arg(long)]
    trace: PathBuf,

    /// Directory downloaded tiles are stored in.
    #[arg(long)]
    out_dir: PathBuf,

    /// Identifier sent to the server in the hello.
    #[arg(long, default_value = "1")]
    client_id: String,

    /// Write the JSON summary here instead of stdout.
    #[arg(long)]
    summary: Option<PathBuf>,
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

    // ── Config & inputs ─────────────────────────────────────────
    let config = match &cli.config {
        Some(path) => SessionConfig::from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    let trace = ViewportTrace::from_path(&cli.trace, config.video.tile_count)
        .with_context(|| format!("loading trace {}", cli.trace.display()))?;
    std::fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("creating {}", cli.out_dir.display()))?;
    let store: Arc<dyn TileStore> = Arc::new(DirTileStore::new(&cli.out_dir));

    tracing::info!(
        connect = %cli.connect,
        client_id = %cli.client_id,
        frames = trace.len(),
        "panocast-client starting"
    );

    // ── Session ─────────────────────────────────────────────────
    let stream = TcpStream::connect(cli.connect)
        .await
        .with_context(|| format!("connecting to {}", cli.connect))?;
    stream.set_nodelay(true)?;

    let summary = panocast_client::run(stream, store, &trace, &config, &cli.client_id).await?;

    // ── Report ──────────────────────────────────────────────────
    let json = serde_json::to_string_pretty(&summary)?;
    match &cli.summary {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(path = %path.display(), "summary written");
        }
        None => println!("{json}"),
    }

    Ok(())
}
