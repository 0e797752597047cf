//! framecast viewer — entry point.
//!
//! Listens for producer connections and logs every received frame and
//! hub status event. Detection and region decoding plug in through the
//! `framecast-core` capability traits; this binary runs the transport
//! side only.
//!
//! ```text
//! framecast-viewer                   Listen with defaults
//! framecast-viewer --config <path>  Use custom config TOML
//! framecast-viewer --gen-config     Dump default config and exit
//! ```

mod config;

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use framecast_core::FrameHub;

use crate::config::ViewerAppConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "framecast-viewer", about = "framecast frame receiver")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "framecast-viewer.toml")]
    config: PathBuf,

    /// Bind address (overrides config).
    #[arg(long)]
    bind: Option<String>,

    /// Listener port (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerAppConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ViewerAppConfig::load(&cli.config);
    if let Some(bind) = cli.bind {
        config.network.bind_host = bind;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("framecast-viewer v{}", env!("CARGO_PKG_VERSION"));

    let hub = FrameHub::new();

    // Surface hub events in the log.
    let mut status = hub.status().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = status.recv().await {
            info!("hub: {event}");
        }
    });

    // Log each received frame.
    let mut frames = hub.subscribe();
    tokio::spawn(async move {
        let mut count: u64 = 0;
        while let Some(frame) = frames.recv().await {
            count += 1;
            info!(
                "frame {count}: {}x{} ({} bytes on the wire)",
                frame.image.width,
                frame.image.height,
                frame.payload.len()
            );
        }
    });

    let addr = hub
        .start(&config.network.bind_host, config.network.port)
        .await?;
    info!("listening on {addr}; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    hub.stop();
    Ok(())
}
