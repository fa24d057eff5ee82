//! HTTP API
//!
//! Thin axum layer over the command gate:
//!
//! - `POST /api/execute` runs a command through the gate
//! - `GET /api/allowed-commands` lists the allowlist
//! - `GET /api/status` reports server status
//! - `GET /health` liveness probe

mod handlers;

use crate::config::Config;
use crate::gate::CommandGate;
use anyhow::{Context, Result};
use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use handlers::{AllowedCommandsResponse, StatusResponse};

/// Shared, read-only state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<CommandGate>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(gate: CommandGate) -> Self {
        Self {
            gate: Arc::new(gate),
            started_at: Utc::now(),
        }
    }
}

/// Request body for `POST /api/execute`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub command: String,
}

/// Response body for `POST /api/execute`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

/// Build the API router
pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    let app = Router::new()
        .route("/api/execute", post(handlers::execute))
        .route("/api/allowed-commands", get(handlers::allowed_commands))
        .route("/api/status", get(handlers::status))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    match cors_layer(cors_origins) {
        Some(cors) => app.layer(cors),
        None => app,
    }
}

/// CORS for the configured origins; `None` when the list is empty
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }

    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin: {}", o);
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };

    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any),
    )
}

/// Start the API server and serve until shutdown
pub async fn serve(config: &Config) -> Result<()> {
    let gate = CommandGate::from_config(&config.gate);
    info!(
        "Allowed commands: {}, timeout: {}s",
        gate.allowed_commands().len(),
        gate.timeout().secs()
    );

    let app = router(AppState::new(gate), &config.server.cors_origins);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    info!("Starting extendipede API on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind API server on {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
