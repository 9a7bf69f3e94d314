//! Shared bearer-token authentication for `/v1` routes.
//!
//! Only a SHA-256 digest of the configured token is kept in memory. The
//! token itself is never logged; [`ApiToken::fingerprint`] gives a short,
//! non-secret handle for startup logs.

use std::fmt;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::api::error::ApiError;
use crate::api::request_id;
use crate::state::AppState;

#[derive(Clone)]
pub struct ApiToken {
    digest: [u8; 32],
}

impl ApiToken {
    pub fn new(token: &str) -> Self {
        Self {
            digest: digest(token),
        }
    }

    /// Compare `presented` against the configured token in constant time.
    pub fn verify(&self, presented: &str) -> bool {
        let presented = digest(presented);
        self.digest
            .iter()
            .zip(presented.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    pub fn fingerprint(&self) -> String {
        hex::encode(&self.digest[..4])
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiToken")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

fn digest(token: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(token.as_bytes()));
    out
}

/// Reject requests without the configured bearer token.
///
/// A no-op when no token is configured.
pub async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.api_token() else {
        return Ok(next.run(request).await);
    };
    let request_id = request_id(request.headers());

    let Some(auth_value) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return Err(ApiError::unauthorized(
            "missing_authorization",
            "Authorization header is required",
        )
        .with_request_id(request_id));
    };

    let Some(token) = auth_value.trim().strip_prefix("Bearer ") else {
        return Err(ApiError::unauthorized(
            "invalid_authorization",
            "Authorization must be a Bearer token",
        )
        .with_request_id(request_id));
    };

    if !expected.verify(token.trim()) {
        warn!(request_id = %request_id, "Rejected request with invalid bearer token");
        return Err(
            ApiError::unauthorized("invalid_token", "Bearer token is not valid")
                .with_request_id(request_id),
        );
    }

    Ok(next.run(request).await)
}
