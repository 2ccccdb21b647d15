use axum::{extract::Extension, http::StatusCode, response::Response};
use serde_json::json;

use gatehouse_auth::Principal;

use crate::app::errors::success;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/v1/whoami
pub async fn whoami(Extension(principal): Extension<Principal>) -> Response {
    success(
        StatusCode::OK,
        "Principal resolved",
        json!({
            "id": principal.subject_id(),
            "email": principal.email(),
        }),
    )
}
