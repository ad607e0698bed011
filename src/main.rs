//! wax-enrich - Record enrichment microservice
//!
//! Gates inbound requests through per-identity admission control, searches
//! the Discogs catalog for the best release match, fetches full release
//! details, and asks the Anthropic Messages API for a short
//! collector-oriented description of the record.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wax_enrich::config::AppConfig;
use wax_enrich::services::anthropic_client::AnthropicClient;
use wax_enrich::services::discogs_client::DiscogsClient;
use wax_enrich::AppState;

/// Command-line arguments for wax-enrich
#[derive(Parser, Debug)]
#[command(name = "wax-enrich")]
#[command(about = "Record enrichment microservice")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5750", env = "WAX_ENRICH_PORT")]
    port: u16,

    /// Path to the TOML config file
    #[arg(short, long, default_value = "wax-enrich.toml", env = "WAX_ENRICH_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wax_enrich=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command-line arguments
    let args = Args::parse();

    info!("Starting wax-enrich on port {}", args.port);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve configuration; missing credentials fail startup here rather
    // than surfacing as opaque upstream errors on the first request
    let config = AppConfig::resolve(&args.config).context("Failed to resolve configuration")?;
    info!(
        max_requests = config.max_requests,
        window_secs = config.window.as_secs(),
        web_search = config.web_search,
        "Configuration resolved"
    );

    // Construct upstream clients
    let discogs = DiscogsClient::new(config.discogs_token.clone())
        .context("Failed to create Discogs client")?;
    let anthropic = AnthropicClient::new(config.anthropic_api_key.clone(), config.model.clone())
        .context("Failed to create Anthropic client")?
        .with_max_tokens(config.max_tokens)
        .with_web_search(config.web_search);

    // Create application state and router
    let state = AppState::new(config, discogs, anthropic);
    let app = wax_enrich::build_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
