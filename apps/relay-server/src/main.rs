//! Relay server.
//!
//! Run with: cargo run -p deskrelay-relay-server -- --port 8000
//!
//! Web peers connect to `/ws?code=<code>`, agents to
//! `/ws?code=<code>&client_type=agent`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::Parser;
use deskrelay_planner::{DEFAULT_BASE_URL, DEFAULT_MODEL, OpenAiDecomposer, PlannerConfig};
use deskrelay_session::SessionRegistry;
use deskrelay_transport::{RelayState, relay_router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "deskrelay-relay", version, about = "Pairs web controllers with desktop agents")]
struct Args {
    #[arg(long, env = "DESKRELAY_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// Key for the chat-completions API; commands fail without it.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    openai_base_url: String,

    #[arg(long, env = "DESKRELAY_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Browser origin allowed by CORS (repeatable). Any origin if omitted.
    #[arg(long = "allowed-origin")]
    allowed_origins: Vec<String>,
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

    if args.openai_api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY not set, commands will be rejected");
    }
    let decomposer = OpenAiDecomposer::new(PlannerConfig {
        base_url: args.openai_base_url,
        api_key: args.openai_api_key,
        model: args.model,
        ..PlannerConfig::default()
    })
    .context("failed to build HTTP client")?;

    let state = RelayState::new(Arc::new(SessionRegistry::new()), Arc::new(decomposer));
    let app = relay_router(state, &args.allowed_origins);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", args.host, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Relay listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down");
        })
        .await
        .context("server error")?;

    Ok(())
}
