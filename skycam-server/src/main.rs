//! Skycam server — entry point.
//!
//! ```text
//! skycam-server                   Run the acquisition + streaming server
//! skycam-server --config <path>   Load a custom config TOML
//! skycam-server --gen-config      Print default config to stdout
//! skycam-server --calibrate       Run a calibration sweep and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use skycam_core::{
    AcquireService, CommandSlot, FlatFileArchive, ImageSlot, StreamServer, ZstdImageCodec,
};
use skycam_server::calibrate;
use skycam_server::config::ServerConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "skycam-server", about = "Skycam CCD acquisition and streaming server")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "skycam-server.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Run a calibration sweep instead of the streaming server.
    #[arg(long)]
    calibrate: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config.
    let config = ServerConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    info!("skycam-server v{}", env!("CARGO_PKG_VERSION"));
    info!("bind address: {}:{}", config.network.bind_addr, config.network.port);
    info!("initial exposure: {} s", config.camera.initial_exposure_s);
    info!("archive dir: {}", config.archive.dir);

    let token = CancellationToken::new();

    // Ctrl-C handler.
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received — shutting down");
        ctrl_c_token.cancel();
    });

    // --calibrate: sweep and exit.
    if cli.calibrate {
        let mut camera = config.build_camera();
        let archive = FlatFileArchive::new(&config.archive.dir)?;
        let points = calibrate::run_sweep(
            &mut camera,
            Some(&archive),
            &token,
            calibrate::DEFAULT_FRAMES_PER_SETTING,
        )
        .await?;
        info!(points = points.len(), "calibration sweep complete");
        return Ok(());
    }

    // Acquisition and streaming share a frame slot and a command slot.
    let frames = Arc::new(ImageSlot::new());
    let commands = Arc::new(CommandSlot::new());

    let mut acquire = AcquireService::new(
        Box::new(config.build_camera()),
        Box::new(ZstdImageCodec::new()),
        Arc::clone(&frames),
        Arc::clone(&commands),
        token.clone(),
        config.to_acquire_config(),
    );
    if config.archive.enabled {
        acquire = acquire.with_archive(Box::new(FlatFileArchive::new(&config.archive.dir)?));
    }

    let mut server =
        StreamServer::bind(&config.to_stream_config(), frames, commands, token.clone()).await?;

    let acquire_handle = tokio::spawn(async move {
        if let Err(e) = acquire.run().await {
            error!("acquisition failed: {e}");
        }
    });
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("stream server failed: {e}");
        }
    });

    acquire_handle.await?;
    server_handle.await?;

    info!("skycam-server stopped");
    Ok(())
}
