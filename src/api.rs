use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::error::StoreError;
use crate::pipeline::Pipeline;
use crate::run::RunId;
use crate::store::{ItemPage, ItemQuery, Store};

/// Snapshot of the one-run-at-a-time flag, as served by `/api/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GateStatus {
    pub is_running: bool,
    pub execution_id: Option<String>,
    pub started_at: Option<String>,
}

/// Admits at most one in-flight run per process.
#[derive(Debug, Default)]
pub struct RunGate {
    current: Mutex<Option<(RunId, DateTime<FixedOffset>)>>,
}

/// Holding this keeps the gate closed; dropping it reopens the gate.
#[derive(Debug)]
pub struct RunGuard {
    gate: Arc<RunGate>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut cur = self.gate.current.lock().unwrap_or_else(PoisonError::into_inner);
        *cur = None;
    }
}

impl RunGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `None` while another run holds the gate.
    pub fn try_acquire(
        self: &Arc<Self>,
        id: RunId,
        started_at: DateTime<FixedOffset>,
    ) -> Option<RunGuard> {
        let mut cur = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if cur.is_some() {
            return None;
        }
        *cur = Some((id, started_at));
        Some(RunGuard {
            gate: Arc::clone(self),
        })
    }

    pub fn status(&self) -> GateStatus {
        let cur = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        match cur.as_ref() {
            Some((id, started)) => GateStatus {
                is_running: true,
                execution_id: Some(id.to_string()),
                started_at: Some(started.to_rfc3339()),
            },
            None => GateStatus::default(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub pipeline: Arc<Pipeline>,
    pub gate: Arc<RunGate>,
    pub categories: Arc<Vec<String>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/items", get(list_items))
        .route("/api/execute", post(execute))
        .route("/api/status", get(status))
        .route("/api/logs", get(logs))
        .route("/api/categories", get(categories))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(target: "api", error = %self.0, "store query failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

async fn list_items(
    State(state): State<AppState>,
    Query(q): Query<ItemQuery>,
) -> Result<Json<ItemPage>, ApiError> {
    Ok(Json(state.store.list_items(&q, Utc::now()).await?))
}

async fn execute(State(state): State<AppState>) -> Response {
    let started_at = state.pipeline.clock().now();
    let run_id = RunId::for_start(&started_at);

    let Some(guard) = state.gate.try_acquire(run_id.clone(), started_at) else {
        let cur = state.gate.status();
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "status": "already_running",
                "execution_id": cur.execution_id,
                "message": "a run is already in progress",
            })),
        )
            .into_response();
    };

    // Run ids have one-second resolution; a run finished earlier in the same
    // second already owns this id.
    match state.store.get_run(run_id.as_str()).await {
        Ok(None) => {}
        Ok(Some(_)) => {
            drop(guard);
            return (
                StatusCode::CONFLICT,
                Json(json!({
                    "status": "duplicate_execution_id",
                    "execution_id": run_id.as_str(),
                    "message": "a run with this id already exists; retry in a second",
                })),
            )
                .into_response();
        }
        Err(e) => {
            drop(guard);
            return ApiError(e).into_response();
        }
    }

    let pipeline = Arc::clone(&state.pipeline);
    let id = run_id.clone();
    tokio::spawn(async move {
        let _guard = guard;
        let summary = pipeline.execute(id, started_at).await;
        tracing::info!(
            target: "api",
            execution_id = %summary.execution_id,
            status = summary.status.as_str(),
            "background run finished"
        );
    });

    Json(json!({
        "status": "started",
        "execution_id": run_id.as_str(),
        "message": "run started",
    }))
    .into_response()
}

async fn status(State(state): State<AppState>) -> Json<GateStatus> {
    Json(state.gate.status())
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default = "default_logs_limit")]
    limit: u32,
}

fn default_logs_limit() -> u32 {
    10
}

async fn logs(
    State(state): State<AppState>,
    Query(q): Query<LogsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let runs = state.store.list_runs(q.limit.clamp(1, 100)).await?;
    Ok(Json(json!({ "logs": runs })))
}

async fn categories(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "categories": state.categories.as_slice() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2025-03-01T10:00:00+09:00").unwrap()
    }

    #[test]
    fn gate_admits_one_run_until_guard_drops() {
        let gate = RunGate::new();
        let g = gate.try_acquire(RunId::for_start(&t0()), t0()).unwrap();
        assert!(gate.try_acquire(RunId::for_start(&t0()), t0()).is_none());
        assert_eq!(
            gate.status().execution_id.as_deref(),
            Some("exec_20250301_100000")
        );
        drop(g);
        assert_eq!(gate.status(), GateStatus::default());
        assert!(gate.try_acquire(RunId::for_start(&t0()), t0()).is_some());
    }
}
