//! wax-enrich library interface
//!
//! Exposes the application state, router construction, and the core
//! services for integration testing.

pub mod api;
pub mod config;
pub mod error;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::services::anthropic_client::AnthropicClient;
use crate::services::discogs_client::DiscogsClient;
use crate::services::rate_limiter::RateLimiter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Resolved configuration (immutable after startup)
    pub config: Arc<AppConfig>,
    /// Admission controller, constructed at startup and injected here so a
    /// replacement store can be swapped in without touching handlers
    pub rate_limiter: Arc<RateLimiter>,
    /// Catalog client
    pub discogs: Arc<DiscogsClient>,
    /// Text generation client
    pub anthropic: Arc<AnthropicClient>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last pipeline error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(config: AppConfig, discogs: DiscogsClient, anthropic: AnthropicClient) -> Self {
        let rate_limiter = RateLimiter::new(config.max_requests, config.window);
        Self {
            config: Arc::new(config),
            rate_limiter: Arc::new(rate_limiter),
            discogs: Arc::new(discogs),
            anthropic: Arc::new(anthropic),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::enrich_routes())
        .merge(api::search_routes())
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
