use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use simalloc_ledger::LedgerError;

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

#[derive(Debug, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("about:blank#{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            code,
            request_id: "unknown".to_string(),
            details: None,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
}

impl ApiError {
    fn with_status(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn unauthorized(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, code, message)
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::CONFLICT, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.problem.request_id = request_id.into();
        self
    }

    pub fn with_details(mut self, details: Vec<FieldError>) -> Self {
        self.problem.details = Some(details);
        self
    }

    pub fn code(&self) -> &str {
        &self.problem.code
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match &err {
            LedgerError::NotFound(worker_id) => Self::not_found(
                "allocation_not_found",
                format!("worker {worker_id} has no allocation"),
            ),
            LedgerError::InvalidTransition { .. } => {
                Self::bad_request("invalid_status", err.to_string())
            }
            LedgerError::AlreadyHeld { .. } => Self::conflict("allocation_conflict", err.to_string()),
            LedgerError::AlreadyFinished { .. } => {
                Self::conflict("allocation_finished", err.to_string())
            }
            _ => {
                tracing::error!(error = %err, "Ledger operation failed");
                Self::internal("internal_error", "allocation ledger is unavailable")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simalloc_id::WorkerId;

    #[test]
    fn test_not_found_maps_to_404() {
        let err: ApiError = LedgerError::NotFound(WorkerId::parse("wX").unwrap()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "allocation_not_found");
    }

    #[test]
    fn test_already_finished_maps_to_409() {
        let err: ApiError = LedgerError::AlreadyFinished {
            worker_id: WorkerId::parse("w1").unwrap(),
            status: simalloc_ledger::AllocationStatus::Completed,
        }
        .into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code(), "allocation_finished");
    }

    #[test]
    fn test_problem_json_content_type() {
        let response = ApiError::bad_request("invalid_uid", "bad")
            .with_request_id("req_1")
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            HeaderValue::from_static("application/problem+json")
        );
    }

    #[test]
    fn test_problem_serialization() {
        let err = ApiError::conflict("iteration_mismatch", "wrong iteration")
            .with_request_id("req_abc")
            .with_details(vec![FieldError::new("iteration_uid", "expected it0001")]);
        let json = serde_json::to_value(&err.problem).unwrap();
        assert_eq!(json["status"], 409);
        assert_eq!(json["title"], "Conflict");
        assert_eq!(json["request_id"], "req_abc");
        assert_eq!(json["details"][0]["field"], "iteration_uid");
    }
}
