//! framecast sender — entry point.
//!
//! ```text
//! framecast-sender                   Stream with defaults
//! framecast-sender --config <path>  Use custom config TOML
//! framecast-sender --gen-config     Dump default config and exit
//! ```

mod config;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use framecast_core::{FrameSender, SenderConfig, TestPatternSource};

use crate::config::SenderAppConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "framecast-sender", about = "framecast frame producer")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "framecast-sender.toml")]
    config: PathBuf,

    /// Hub host (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Hub port (overrides config).
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
        let text = toml::to_string_pretty(&SenderAppConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = SenderAppConfig::load(&cli.config);
    if let Some(host) = cli.host {
        config.target.host = host;
    }
    if let Some(port) = cli.port {
        config.target.port = port;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("framecast-sender v{}", env!("CARGO_PKG_VERSION"));

    let source = TestPatternSource::new(
        config.capture.width,
        config.capture.height,
        config.capture.fps,
    );
    let sender = FrameSender::with_config(
        Box::new(source),
        SenderConfig {
            retry_backoff: Duration::from_millis(config.target.retry_backoff_ms),
            ..SenderConfig::default()
        },
    );

    // Surface lifecycle events in the log.
    let mut status = sender.status().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = status.recv().await {
            info!("sender: {event}");
        }
    });

    let started = sender
        .start(
            &config.target.host,
            config.target.port,
            config.target.max_attempts,
        )
        .await?;
    if !started {
        error!(
            "could not reach {}:{} after {} attempts",
            config.target.host, config.target.port, config.target.max_attempts
        );
        return Ok(());
    }

    info!("streaming; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    sender.stop().await;
    info!("stopped ({})", sender.state());
    Ok(())
}
