use super::{ApiResponse, AppState, ExecuteRequest};
use crate::gate::ExecutionResult;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Response body for `GET /api/allowed-commands`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedCommandsResponse {
    pub commands: Vec<String>,
    pub count: usize,
}

/// Response body for `GET /api/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub allowed_commands: usize,
    pub current_directory: String,
    pub timeout_secs: u64,
    pub version: String,
    pub started_at: String,
}

impl From<ExecutionResult> for ApiResponse {
    fn from(result: ExecutionResult) -> Self {
        Self {
            success: result.success,
            output: result.output,
            error: result.error,
        }
    }
}

/// POST /api/execute
pub(super) async fn execute(
    State(state): State<AppState>,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!("Rejected execute request: {}", rejection.body_text());
            let body = ApiResponse {
                success: false,
                output: format!("Server error: {}", rejection.body_text()),
                error: Some(rejection.body_text()),
            };
            return (StatusCode::BAD_REQUEST, Json(body));
        }
    };

    let command = request.command.trim();
    if command.is_empty() {
        let body = ApiResponse {
            success: false,
            output: "No command provided".to_string(),
            error: Some("Empty command".to_string()),
        };
        return (StatusCode::OK, Json(body));
    }

    let result = state.gate.run(command).await;
    (StatusCode::OK, Json(ApiResponse::from(result)))
}

/// GET /api/allowed-commands
pub(super) async fn allowed_commands(State(state): State<AppState>) -> impl IntoResponse {
    let commands = state.gate.allowed_commands().names();
    Json(AllowedCommandsResponse {
        count: commands.len(),
        commands,
    })
}

/// GET /api/status
pub(super) async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let current_directory = match state.gate.working_dir() {
        Some(dir) => dir.display().to_string(),
        None => std::env::current_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|e| format!("unavailable ({e})")),
    };

    Json(StatusResponse {
        status: "running".to_string(),
        allowed_commands: state.gate.allowed_commands().len(),
        current_directory,
        timeout_secs: state.gate.timeout().secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: state.started_at.to_rfc3339(),
    })
}

/// GET /health
pub(super) async fn health() -> impl IntoResponse {
    StatusCode::OK
}
