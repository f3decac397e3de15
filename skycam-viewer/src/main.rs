//! Skycam viewer — entry point.
//!
//! ```text
//! skycam-viewer                              Monitor the frame stream
//! skycam-viewer --config <path>              Load a custom config TOML
//! skycam-viewer --address 10.0.0.5:12395     Override the server address
//! skycam-viewer --gen-config                 Print default config to stdout
//! skycam-viewer --start --count 5 --exposure 2.0 --prefix m31
//!                                            Start a sequence, then monitor
//! skycam-viewer --stop                       Stop the running sequence
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use skycam_core::{ControlCommand, ViewerClient};
use skycam_viewer::config::ViewerConfig;
use skycam_viewer::session::{self, FrameSink};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "skycam-viewer", about = "Skycam stream viewer and sequence commander")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "skycam-viewer.toml")]
    config: PathBuf,

    /// Server address (IP:port), overriding the config file.
    #[arg(short, long)]
    address: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Start an exposure sequence on connect.
    #[arg(long)]
    start: bool,

    /// Stop the running sequence on connect.
    #[arg(long, conflicts_with = "start")]
    stop: bool,

    /// Exposures in the sequence.
    #[arg(long, default_value_t = 1)]
    count: u8,

    /// Exposure time in seconds.
    #[arg(long, default_value_t = 1.0)]
    exposure: f64,

    /// Binning factor to request.
    #[arg(long)]
    binning: Option<u8>,

    /// Compression quality to request, `0..=100`.
    #[arg(long)]
    quality: Option<u8>,

    /// Archive name prefix for the sequence.
    #[arg(long, default_value = "capture")]
    prefix: String,
}

/// Build the command to send on connect, if the flags ask for one.
fn command_from_cli(cli: &Cli) -> Option<ControlCommand> {
    if cli.start {
        let mut cmd = ControlCommand::start(
            cli.count,
            cli.exposure,
            cli.binning.unwrap_or(1),
            &cli.prefix,
        );
        if let Some(quality) = cli.quality {
            cmd = cmd.with_quality(quality);
        }
        Some(cmd)
    } else if cli.stop {
        Some(ControlCommand::stop())
    } else if cli.quality.is_some() || cli.binning.is_some() {
        let mut cmd = ControlCommand::default();
        if let Some(quality) = cli.quality {
            cmd = cmd.with_quality(quality);
        }
        if let Some(binning) = cli.binning {
            cmd = cmd.with_binning(binning);
        }
        Some(cmd)
    } else {
        None
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config; the address flag wins over the file.
    let mut config = ViewerConfig::load(&cli.config);
    if let Some(address) = cli.address.clone() {
        config.connection.address = address;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    info!("skycam-viewer v{}", env!("CARGO_PKG_VERSION"));
    info!("server address: {}", config.connection.address);

    let addr: SocketAddr = config.connection.address.parse()?;
    let timeout = Duration::from_millis(config.connection.timeout_ms);
    let reconnect_delay = Duration::from_millis(config.connection.reconnect_delay_ms);
    let stats_interval = Duration::from_millis(config.output.stats_interval_ms.max(500));

    let token = CancellationToken::new();

    // Ctrl-C handler.
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received — shutting down");
        ctrl_c_token.cancel();
    });

    let mut sink = if config.output.save_dir.is_empty() {
        None
    } else {
        info!("saving frames to {}", config.output.save_dir);
        Some(FrameSink::new(&config.output.save_dir)?)
    };

    // Sent once, on the first successful connect.
    let mut pending_command = command_from_cli(&cli);

    while !token.is_cancelled() {
        let client = match ViewerClient::connect(addr, timeout, &token).await {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "connect failed");
                tokio::select! {
                    _ = tokio::time::sleep(reconnect_delay) => continue,
                    _ = token.cancelled() => break,
                }
            }
        };

        if let Some(cmd) = pending_command.take() {
            match client.send_command(cmd).await {
                Ok(()) => info!(
                    start = cmd.start,
                    stop = cmd.stop,
                    count = cmd.count,
                    exposure = cmd.exposure,
                    "control command sent"
                ),
                Err(e) => warn!(error = %e, "command send failed"),
            }
        }

        let summary = session::run_session(&client, &mut sink, stats_interval, &token).await;
        info!(
            frames = summary.frames_handled,
            saved = summary.frames_saved,
            "session ended"
        );

        if let Err(e) = client.shutdown().await {
            warn!(error = %e, "client shutdown reported an error");
        }

        if token.is_cancelled() {
            break;
        }
        info!("reconnecting in {} ms", config.connection.reconnect_delay_ms);
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = token.cancelled() => break,
        }
    }

    info!("skycam-viewer stopped");
    Ok(())
}
