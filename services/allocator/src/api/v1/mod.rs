//! API v1 routes.
//!
//! Every route here sits behind [`require_token`] when a bearer token is
//! configured.

mod parameters;
mod reports;
mod status;

use axum::{
    extract::rejection::JsonRejection,
    middleware,
    routing::{get, post},
    Json, Router,
};
use simalloc_id::WorkerId;

use crate::api::auth::require_token;
use crate::api::error::{ApiError, FieldError};
use crate::state::AppState;

/// Create API v1 routes.
pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/parameters", post(parameters::request_parameters))
        .route("/results", post(reports::submit_result))
        .route("/failures", post(reports::report_failure))
        .route("/status", get(status::get_status))
        .route("/workers/active", get(status::list_active_workers))
        .route_layer(middleware::from_fn_with_state(state, require_token))
}

/// Unwrap a JSON body, turning extractor rejections into problem details.
fn json_body<T>(body: Result<Json<T>, JsonRejection>, request_id: &str) -> Result<T, ApiError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(ApiError::bad_request("invalid_body", rejection.body_text())
            .with_request_id(request_id)),
    }
}

fn parse_worker_id(uid: &str, request_id: &str) -> Result<WorkerId, ApiError> {
    WorkerId::parse(uid).map_err(|e| {
        ApiError::bad_request("invalid_uid", "uid is not a valid worker id")
            .with_request_id(request_id)
            .with_details(vec![FieldError::new("uid", e.to_string())])
    })
}
