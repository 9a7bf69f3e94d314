//! Progress and worker listing endpoints.

use axum::{extract::State, Json};
use serde::Serialize;
use simalloc_id::WorkerId;
use simalloc_ledger::StatusSummary;

use crate::state::AppState;

/// Workers currently holding a `working` allocation.
#[derive(Debug, Serialize)]
pub struct ActiveWorkersResponse {
    pub workers: Vec<WorkerId>,
    pub count: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusSummary> {
    Json(state.service().status().await)
}

pub async fn list_active_workers(State(state): State<AppState>) -> Json<ActiveWorkersResponse> {
    let workers = state.service().active_workers().await;
    Json(ActiveWorkersResponse {
        count: workers.len(),
        workers,
    })
}
