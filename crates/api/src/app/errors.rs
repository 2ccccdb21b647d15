//! Error taxonomy and the JSON response envelope.
//!
//! Every local handler answers with
//! `{"status": "success"|"failed", "message": .., "data"|"error": ..}`.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use gatehouse_auth::{AuthzError, SessionError};

use crate::validation::ValidationErrors;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing, malformed or mis-signed credential.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Authenticated, but a role requirement failed.
    #[error("missing required roles")]
    Unauthorized,

    /// Authenticated, but not the owner of the resource.
    #[error("forbidden")]
    Forbidden,

    /// Body is not valid JSON for the expected shape (includes unknown fields).
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// Body decoded but failed field constraints.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("too many requests")]
    RateLimited { retry_after: u64 },

    #[error("internal error in {operation}: {reason}")]
    Internal {
        operation: &'static str,
        reason: String,
    },

    #[error("bad gateway: {0}")]
    Gateway(String),
}

impl ApiError {
    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        Self::Unauthenticated(reason.into())
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest(reason.into())
    }

    pub fn internal(operation: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Internal {
            operation,
            reason: reason.to_string(),
        }
    }

    pub fn gateway(reason: impl Into<String>) -> Self {
        Self::Gateway(reason.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::InvalidBody(_) | Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::InvalidBody(_) => "invalid_body",
            Self::Validation(_) => "validation_error",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::RateLimited { .. } => "rate_limited",
            Self::Internal { .. } => "internal_error",
            Self::Gateway(_) => "bad_gateway",
        }
    }

    fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// `(message, error)` pair for the envelope. Server-side detail is never
    /// included.
    fn envelope_parts(&self) -> (&'static str, Value) {
        match self {
            Self::Unauthenticated(reason) => {
                ("You are not authorized to access this route", json!(reason))
            }
            Self::Unauthorized => (
                "You are not authorized to access this route",
                json!("Forbidden: You do not have the required roles"),
            ),
            Self::Forbidden => ("Forbidden", json!("You are not allowed to access this resource")),
            Self::InvalidBody(detail) => ("Invalid request body", json!(detail)),
            Self::Validation(errors) => ("Validation failed", json!(errors.fields)),
            Self::BadRequest(reason) => ("Bad request", json!(reason)),
            Self::NotFound(what) => ("Not found", json!(what)),
            Self::Conflict(what) => ("Conflict", json!(what)),
            Self::RateLimited { .. } => ("Too many requests", json!("rate limit exceeded")),
            Self::Internal { .. } => ("Something went wrong", json!("internal server error")),
            Self::Gateway(_) => ("Bad Gateway", json!("upstream service unavailable")),
        }
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::NotFound(entity) => Self::NotFound(format!("{entity} not found")),
            AuthzError::Conflict(msg) => Self::Conflict(msg),
            AuthzError::Invalid(msg) => Self::BadRequest(msg),
            AuthzError::Internal { operation, reason } => Self::Internal { operation, reason },
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Signing(reason) => Self::internal("issue_session", reason),
            SessionError::MissingSecret => Self::internal("issue_session", "signing secret is empty"),
            SessionError::Malformed | SessionError::InvalidSignature | SessionError::InvalidClaims => {
                Self::unauthenticated("Invalid token")
            }
        }
    }
}

impl From<gatehouse_core::DomainError> for ApiError {
    fn from(err: gatehouse_core::DomainError) -> Self {
        use gatehouse_core::DomainError;
        match err {
            DomainError::NotFound(entity) => Self::NotFound(format!("{entity} not found")),
            DomainError::Conflict(msg) => Self::Conflict(msg),
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::BadRequest(msg),
            DomainError::Unavailable(reason) => Self::internal("user_store", reason),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        if self.is_server_error() {
            tracing::error!(error = %self, error_code, status = %status, "server error");
        } else {
            tracing::debug!(error = %self, error_code, status = %status, "request rejected");
        }

        let (message, error) = self.envelope_parts();
        let mut response = (
            status,
            Json(json!({
                "status": "failed",
                "message": message,
                "error": error,
            })),
        )
            .into_response();

        if let Self::RateLimited { retry_after } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// Successful envelope: `{"status":"success","message":..,"data":..}`.
pub fn success<T: Serialize>(status: StatusCode, message: &str, data: T) -> Response {
    (
        status,
        Json(json!({
            "status": "success",
            "message": message,
            "data": data,
        })),
    )
        .into_response()
}
