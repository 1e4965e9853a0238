// SPDX-License-Identifier: AGPL-3.0-only

//! clconv inference server
//!
//! HTTP front end for the accelerator pipeline. One process-wide context
//! (device, program, resident weights, kernels) serves every request; each
//! request runs in its own session.
//!
//! ```text
//! POST /infer    1024 comma-separated floats → 8 floats (scientific notation)
//! GET  /health   JSON status
//! ```

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use clconv_device::DEFAULT_PROGRAM_PATH;
use clconv_pipeline::{BroadcastMode, PipelineConfig, SyncMode, DEFAULT_WEIGHTS_DIR};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::state::{AppState, ServerConfig};

/// clconv inference server
#[derive(Parser, Debug)]
#[command(name = "clconv-server")]
#[command(version)]
#[command(about = "HTTP inference endpoint for the clconv accelerator pipeline")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Device program image
    #[arg(long, env = "CLCONV_PROGRAM", default_value = DEFAULT_PROGRAM_PATH)]
    program: PathBuf,

    /// Directory holding the weight files
    #[arg(long, env = "CLCONV_WEIGHTS_DIR", default_value = DEFAULT_WEIGHTS_DIR)]
    weights_dir: PathBuf,

    /// Dispatch ordering: drain or events
    #[arg(long, env = "CLCONV_SYNC_MODE", default_value = "drain")]
    sync: SyncMode,

    /// Bias broadcast-add placement: host or device
    #[arg(long, env = "CLCONV_BROADCAST_MODE", default_value = "host")]
    broadcast: BroadcastMode,

    /// Defer accelerator initialization to the first request
    #[arg(long)]
    lazy: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .compact()
        .init();

    let config = ServerConfig {
        pipeline: PipelineConfig::default()
            .with_program_path(cli.program)
            .with_sync_mode(cli.sync)
            .with_broadcast_mode(cli.broadcast),
        weights_dir: cli.weights_dir,
    };

    info!("clconv inference server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Program:     {}", config.pipeline.program_path.display());
    info!("  Weights dir: {}", config.weights_dir.display());
    info!("  Sync mode:   {}", config.pipeline.sync_mode);
    info!("  Broadcast:   {}", config.pipeline.broadcast_mode);

    let state = Arc::new(AppState::new(config));

    // Configuration errors are fatal at startup unless initialization is deferred
    if !cli.lazy {
        let warm = Arc::clone(&state);
        tokio::task::spawn_blocking(move || warm.context()).await??;
    }

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/infer", post(routes::infer::infer))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
