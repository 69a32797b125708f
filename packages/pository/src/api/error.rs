//! The JSON error currency of the HTTP surface: `{error, detail?}` plus a
//! status code. Internal failures are logged in full and surfaced opaque.

use axum::{
    Json,
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{auth::AuthError, storage::StorageError};

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    /// The HTTP status code.
    #[serde(skip)]
    status: StatusCode,
    /// A short, unique error code.
    pub error: String,
    /// A human-readable explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, error: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            detail: Some(detail.into()),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "AUTH_INVALID", detail)
    }

    pub fn auth_missing() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "AUTH_MISSING",
            "provide `X-Api-Key` or `Authorization: Bearer <token>`",
        )
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "AUTH_FORBIDDEN", detail)
    }

    pub fn repo_not_allowed(repo: &str) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "REPO_NOT_ALLOWED",
            format!("repo {repo} is not in the allowed repos list"),
        )
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILURE", detail)
    }

    pub fn payload_too_large(limit: u64) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "PAYLOAD_TOO_LARGE",
            format!("upload exceeds the configured limit of {limit} bytes"),
        )
    }

    pub fn not_found(entity: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: format!("{}_NOT_FOUND", entity.to_uppercase()),
            detail: Some(format!("{entity} not found")),
        }
    }

    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL",
            "internal server error",
        )
    }

    pub fn not_ready() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "NOT_READY", "storage is not ready")
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response<Body> {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl From<StorageError> for ErrorResponse {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidLocation => {
                Self::validation("package location contains invalid components")
            }
            err => {
                error!(%err, "storage operation failed");
                Self::internal()
            }
        }
    }
}

impl From<AuthError> for ErrorResponse {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidToken(detail) => Self::unauthorized(detail),
            AuthError::JwksFetch(detail) => {
                error!(detail, "JWKS fetch failed");
                Self::unauthorized("could not verify token signature")
            }
            err => {
                error!(%err, "key store operation failed");
                Self::internal()
            }
        }
    }
}
