//! Transaction Scenario Routes
//!
//! - `GET /txpipeline` - watched update racing a mutator
//! - `GET /syntax-error` - batch aborted by a malformed command
//! - `GET /logic-error` - batch where one command fails alone

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ScenarioConfig;
use crate::txn::{RaceWindow, TransactionCoordinator, TxnError};

// ==================
// Shared State
// ==================

pub struct TxnState {
    pub coordinator: Arc<TransactionCoordinator>,
    pub defaults: ScenarioConfig,
}

impl TxnState {
    pub fn new(coordinator: Arc<TransactionCoordinator>, defaults: ScenarioConfig) -> Self {
        Self {
            coordinator,
            defaults,
        }
    }
}

// ==================
// Request/Response Types
// ==================

/// Query of `/txpipeline`; anything omitted falls back to the configured
/// scenario defaults
#[derive(Debug, Default, Deserialize)]
pub struct TxPipelineQuery {
    #[serde(default)]
    pub key: Option<String>,
    /// timed, mutator-first, session-first or unopposed (default: timed)
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub mutator_delay_ms: Option<u64>,
    #[serde(default)]
    pub hold_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

impl From<TxnError> for (StatusCode, Json<ErrorResponse>) {
    fn from(e: TxnError) -> Self {
        let status =
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(ErrorResponse {
                error: e.to_string(),
                code: e.code(),
            }),
        )
    }
}

fn bad_request(message: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message,
            code: "INVALID_QUERY",
        }),
    )
}

// ==================
// Routes
// ==================

pub fn txn_routes(state: Arc<TxnState>) -> Router {
    Router::new()
        .route("/txpipeline", get(tx_pipeline_handler))
        .route("/syntax-error", get(syntax_error_handler))
        .route("/logic-error", get(logic_error_handler))
        .with_state(state)
}

// ==================
// Handlers
// ==================

async fn tx_pipeline_handler(
    State(state): State<Arc<TxnState>>,
    Query(query): Query<TxPipelineQuery>,
) -> Result<Json<Value>, ApiError> {
    let defaults = &state.defaults;
    let key = query.key.unwrap_or_else(|| defaults.watch_key.clone());
    if key.is_empty() {
        return Err(bad_request("key must not be empty".to_string()));
    }
    let window = RaceWindow::from_mode(
        query.mode.as_deref().unwrap_or("timed"),
        Duration::from_millis(query.mutator_delay_ms.unwrap_or(defaults.mutator_delay_ms)),
        Duration::from_millis(query.hold_ms.unwrap_or(defaults.hold_ms)),
    )
    .map_err(bad_request)?;

    let report = state.coordinator.run_watched_update(&key, window).await?;
    Ok(Json(report.to_response()))
}

async fn syntax_error_handler(
    State(state): State<Arc<TxnState>>,
) -> Result<Json<Value>, ApiError> {
    let report = state.coordinator.run_batch_with_syntax_fault().await?;
    Ok(Json(report.to_response()))
}

async fn logic_error_handler(
    State(state): State<Arc<TxnState>>,
) -> Result<Json<Value>, ApiError> {
    let report = state.coordinator.run_batch_with_logic_fault().await?;
    Ok(Json(report.to_response()))
}
