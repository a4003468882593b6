//! Desktop agent.
//!
//! Run with: cargo run -p deskrelay-desktop-agent -- <ACCESS_CODE>

mod config;

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use deskrelay_platform::{CommandEffector, CommandScreenSource, CommandTemplate};
use deskrelay_transport::AgentRuntime;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::FileConfig;

#[derive(Debug, Parser)]
#[command(name = "deskrelay-agent", version, about = "Executes relayed actions on this machine")]
struct Args {
    /// Access code shared with the web controller.
    access_code: String,

    /// Relay websocket endpoint, e.g. ws://localhost:8000/ws.
    #[arg(long)]
    relay_url: Option<String>,

    /// Screen frames per second (0 < fps <= 30).
    #[arg(long)]
    fps: Option<f64>,

    /// Config file [default: ~/.deskrelay/agent.json].
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let mut file = match args.config.or_else(FileConfig::default_path) {
        Some(path) => FileConfig::load(&path)?,
        None => FileConfig::default(),
    };
    if let Some(relay_url) = args.relay_url {
        file.relay_url = relay_url;
    }
    if let Some(fps) = args.fps {
        file.fps = fps;
    }

    let access_code = args.access_code.trim().to_string();
    anyhow::ensure!(!access_code.is_empty(), "access code must not be empty");

    let screen = match file.capture_command.as_deref() {
        Some(command) => CommandScreenSource::new(CommandTemplate::new(command)),
        None => CommandScreenSource::detect().await,
    };
    let runtime = AgentRuntime::new(
        file.into_agent_config(access_code),
        Arc::new(CommandEffector::default()),
        Arc::new(screen),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
                return;
            }
            tracing::info!("Shutting down");
            shutdown.cancel();
        }
    });

    tracing::info!(
        relay = %runtime.config().relay_url,
        code = %runtime.config().access_code,
        "Starting agent"
    );
    runtime.run(shutdown).await?;

    Ok(())
}
