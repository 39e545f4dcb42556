//! API routes for avopsd
//!
//! Runs are scoped to an owner taken from the `X-User-Id` header, falling
//! back to the configured default user.

use crate::server::AppState;
use avops_common::{AvopsError, CopilotOutput, CopilotRun, InputContext, RunStatus};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

type AppStateArc = Arc<AppState>;

/// Header carrying the caller's user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Default page size for run listings
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Largest page a caller may request
pub const MAX_PAGE_SIZE: usize = 100;

type ApiError = (StatusCode, String);

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopilotRunRequest {
    pub task: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopilotRunResponse {
    pub run_id: i64,
    pub status: RunStatus,
    pub task: String,
    pub input_context: InputContext,
    pub output: CopilotOutput,
    pub created_at: DateTime<Utc>,
}

impl From<CopilotRun> for CopilotRunResponse {
    fn from(run: CopilotRun) -> Self {
        Self {
            run_id: run.id,
            status: run.status,
            task: run.task,
            input_context: run.input_context,
            output: run.output,
            created_at: run.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRunsResponse {
    pub items: Vec<CopilotRunResponse>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListRunsQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Helpers
// ============================================================================

fn resolve_user(headers: &HeaderMap, default_user_id: i64) -> Result<i64, ApiError> {
    let Some(value) = headers.get(USER_ID_HEADER) else {
        return Ok(default_user_id);
    };

    value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| {
            error_response(AvopsError::InvalidRequest(
                "X-User-Id must be an integer".to_string(),
            ))
        })
}

fn error_response(err: AvopsError) -> ApiError {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, err.to_string())
}

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        timestamp: Utc::now(),
    })
}

// ============================================================================
// Copilot Routes
// ============================================================================

pub fn copilot_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/v1/copilot/run", post(copilot_run))
        .route("/api/v1/copilot/runs", get(list_runs))
        .route("/api/v1/copilot/runs/:id", get(get_run))
}

async fn copilot_run(
    State(state): State<AppStateArc>,
    headers: HeaderMap,
    Json(req): Json<CopilotRunRequest>,
) -> Result<Json<CopilotRunResponse>, ApiError> {
    let user_id = resolve_user(&headers, state.default_user_id)?;
    let task = req.task;
    if task.trim().is_empty() {
        return Err(error_response(AvopsError::InvalidRequest(
            "task must not be empty".to_string(),
        )));
    }

    info!("  Copilot run requested by user {}", user_id);

    // The run lives in its own task so it is persisted even if this handler
    // is dropped; dropping the guard cancels the model call.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let engine = Arc::clone(&state.engine);
    let handle =
        tokio::spawn(async move { engine.run_with_cancel(user_id, &task, cancel).await });

    let result = handle.await.map_err(|e| {
        error!("  Copilot run task failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    guard.disarm();

    let run = result.map_err(error_response)?;
    Ok(Json(run.into()))
}

async fn list_runs(
    State(state): State<AppStateArc>,
    headers: HeaderMap,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<ListRunsResponse>, ApiError> {
    let user_id = resolve_user(&headers, state.default_user_id)?;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let runs = state
        .db
        .list_runs(user_id, limit, offset)
        .await
        .map_err(|e| error_response(AvopsError::Storage(format!("{:#}", e))))?;

    Ok(Json(ListRunsResponse {
        items: runs.into_iter().map(CopilotRunResponse::from).collect(),
    }))
}

async fn get_run(
    State(state): State<AppStateArc>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<CopilotRunResponse>, ApiError> {
    let user_id = resolve_user(&headers, state.default_user_id)?;

    let run = state
        .db
        .get_run(id, user_id)
        .await
        .map_err(|e| error_response(AvopsError::Storage(format!("{:#}", e))))?
        .ok_or_else(|| error_response(AvopsError::NotFound(format!("run {}", id))))?;

    Ok(Json(run.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_resolve_user() {
        let mut headers = HeaderMap::new();
        assert_eq!(resolve_user(&headers, 7).unwrap(), 7);

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("42"));
        assert_eq!(resolve_user(&headers, 7).unwrap(), 42);

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("abc"));
        let (status, body) = resolve_user(&headers, 7).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Invalid request: X-User-Id must be an integer");
    }

    #[test]
    fn test_error_response_status() {
        let (status, _) = error_response(AvopsError::NotFound("run 9".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = error_response(AvopsError::Persistence("disk full".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("disk full"));
    }
}
