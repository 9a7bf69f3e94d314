//! Scenario allocation endpoint.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use simalloc_id::IterationId;
use simalloc_ledger::{Allocation, Scenario};
use tracing::info;

use super::{json_body, parse_worker_id};
use crate::api::error::ApiError;
use crate::api::request_id;
use crate::state::AppState;

/// Request for a worker's parameters.
#[derive(Debug, Deserialize)]
pub struct ParameterRequest {
    /// Worker id.
    pub uid: String,
}

/// Allocation outcome. Both variants are a 200.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ParameterResponse {
    Allocated {
        iteration_id: IterationId,
        /// True if the worker already held this scenario.
        reissued: bool,
        parameters: Scenario,
    },
    /// No unallocated scenarios remain.
    Exhausted,
}

pub async fn request_parameters(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ParameterRequest>, JsonRejection>,
) -> Result<Json<ParameterResponse>, ApiError> {
    let request_id = request_id(&headers);
    let req = json_body(body, &request_id)?;
    let worker_id = parse_worker_id(&req.uid, &request_id)?;

    let allocation = state
        .service()
        .allocate(&worker_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(&request_id))?;

    let response = match allocation {
        Allocation::Assigned { scenario, reissued } => {
            info!(
                worker_id = %worker_id,
                iteration_id = %scenario.iteration_id,
                reissued,
                "Allocated scenario"
            );
            ParameterResponse::Allocated {
                iteration_id: scenario.iteration_id.clone(),
                reissued,
                parameters: scenario,
            }
        }
        Allocation::Exhausted => {
            info!(worker_id = %worker_id, "No scenarios left to allocate");
            ParameterResponse::Exhausted
        }
    };

    Ok(Json(response))
}
