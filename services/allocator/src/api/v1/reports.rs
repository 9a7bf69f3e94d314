//! Result and failure reporting endpoints.
//!
//! A result is written to disk before the ledger entry is marked completed,
//! so a `completed` entry always has a result file behind it. Outcomes are
//! final: a second report for a finished entry is a 409 and changes nothing.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use simalloc_id::{IterationId, WorkerId};
use simalloc_ledger::{AllocationEntry, AllocationStatus};
use tracing::{error, info, warn};

use super::{json_body, parse_worker_id};
use crate::api::error::{ApiError, FieldError};
use crate::api::request_id;
use crate::state::AppState;

/// Longest failure message accepted, in characters.
pub const MAX_FAILURE_MESSAGE_LEN: usize = 4096;

/// Posterior summaries submitted by a worker that finished its scenario.
#[derive(Debug, Serialize, Deserialize)]
pub struct SimulationResult {
    pub uid: String,
    pub scenario_uid: String,
    pub iteration_uid: String,
    /// Posterior mean of the emission means, per state and dependent variable.
    pub emiss_mu_bar: Vec<Vec<f64>>,
    /// Posterior mean of the transition intercepts.
    pub gamma_int_bar: Vec<f64>,
    pub emiss_var_bar: Vec<Vec<f64>>,
    pub emiss_varmu_bar: Vec<Vec<f64>>,
}

impl SimulationResult {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.gamma_int_bar.is_empty() {
            errors.push(FieldError::new("gamma_int_bar", "must not be empty"));
        }
        for (field, matrix) in [
            ("emiss_mu_bar", &self.emiss_mu_bar),
            ("emiss_var_bar", &self.emiss_var_bar),
            ("emiss_varmu_bar", &self.emiss_varmu_bar),
        ] {
            if let Some(message) = matrix_problem(matrix) {
                errors.push(FieldError::new(field, message));
            }
        }
        errors
    }
}

fn matrix_problem(matrix: &[Vec<f64>]) -> Option<&'static str> {
    let Some(first) = matrix.first() else {
        return Some("must not be empty");
    };
    if first.is_empty() {
        return Some("rows must not be empty");
    }
    if matrix.iter().any(|row| row.len() != first.len()) {
        return Some("rows must all have the same length");
    }
    None
}

/// A worker reporting that its simulation failed.
#[derive(Debug, Deserialize)]
pub struct FailureReport {
    pub uid: String,
    pub message: String,
}

/// The worker's entry after a status update.
#[derive(Debug, Serialize)]
pub struct StatusUpdateResponse {
    pub worker_id: WorkerId,
    pub iteration_id: IterationId,
    pub status: AllocationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StatusUpdateResponse {
    fn new(worker_id: WorkerId, entry: AllocationEntry) -> Self {
        Self {
            worker_id,
            iteration_id: entry.iteration_id,
            status: entry.status,
            finished_at: entry
                .finished_at
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        }
    }
}

pub async fn submit_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SimulationResult>, JsonRejection>,
) -> Result<Json<StatusUpdateResponse>, ApiError> {
    let request_id = request_id(&headers);
    let result = json_body(body, &request_id)?;
    let worker_id = parse_worker_id(&result.uid, &request_id)?;

    let mut problems = result.validate();
    let iteration_id = match IterationId::parse(&result.iteration_uid) {
        Ok(id) => Some(id),
        Err(e) => {
            problems.push(FieldError::new("iteration_uid", e.to_string()));
            None
        }
    };
    let Some(iteration_id) = iteration_id.filter(|_| problems.is_empty()) else {
        return Err(
            ApiError::bad_request("invalid_result", "result failed validation")
                .with_request_id(&request_id)
                .with_details(problems),
        );
    };

    let service = state.service();
    let Some(entry) = service.entry(&worker_id).await else {
        return Err(ApiError::not_found(
            "allocation_not_found",
            format!("worker {worker_id} has no allocation"),
        )
        .with_request_id(&request_id));
    };
    if entry.iteration_id != iteration_id {
        warn!(
            worker_id = %worker_id,
            held = %entry.iteration_id,
            submitted = %iteration_id,
            "Result submitted for an iteration the worker does not hold"
        );
        return Err(ApiError::conflict(
            "iteration_mismatch",
            format!("worker {worker_id} holds {}", entry.iteration_id),
        )
        .with_request_id(&request_id));
    }
    if !entry.is_working() {
        return Err(ApiError::conflict(
            "allocation_finished",
            format!("worker {worker_id} already finished with status {}", entry.status),
        )
        .with_request_id(&request_id));
    }
    let scenario_matches = service
        .scenario(&iteration_id)
        .await
        .is_some_and(|s| s.scenario_id == result.scenario_uid);
    if !scenario_matches {
        return Err(ApiError::conflict(
            "scenario_mismatch",
            format!("{iteration_id} does not belong to scenario {}", result.scenario_uid),
        )
        .with_request_id(&request_id));
    }

    let path = state
        .results()
        .write(&iteration_id, &result)
        .await
        .map_err(|e| {
            error!(error = %e, iteration_id = %iteration_id, "Failed to write result file");
            ApiError::internal("result_write_failed", "could not store result")
                .with_request_id(&request_id)
        })?;

    let entry = service
        .complete(&worker_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(&request_id))?;
    info!(
        worker_id = %worker_id,
        iteration_id = %iteration_id,
        path = %path.display(),
        "Recorded result"
    );

    Ok(Json(StatusUpdateResponse::new(worker_id, entry)))
}

pub async fn report_failure(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<FailureReport>, JsonRejection>,
) -> Result<Json<StatusUpdateResponse>, ApiError> {
    let request_id = request_id(&headers);
    let report = json_body(body, &request_id)?;
    let worker_id = parse_worker_id(&report.uid, &request_id)?;

    let message = report.message.trim();
    if message.is_empty() || message.chars().count() > MAX_FAILURE_MESSAGE_LEN {
        return Err(
            ApiError::bad_request("invalid_message", "failure message is empty or too long")
                .with_request_id(&request_id)
                .with_details(vec![FieldError::new(
                    "message",
                    format!("must be 1 to {MAX_FAILURE_MESSAGE_LEN} characters"),
                )]),
        );
    }

    let entry = state
        .service()
        .fail(&worker_id, message)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(&request_id))?;
    warn!(
        worker_id = %worker_id,
        iteration_id = %entry.iteration_id,
        reason = message,
        "Worker reported failure"
    );

    Ok(Json(StatusUpdateResponse::new(worker_id, entry)))
}
