use std::sync::Arc;

use axum::{routing::get, Router};

use crate::app::services::AppServices;
use crate::pipeline::Pipeline;
use crate::push;

pub mod auth;
pub mod roles;
pub mod system;

/// Locally handled `/api/v1` endpoints plus the websocket.
pub fn router(services: &Arc<AppServices>) -> Router {
    let authenticated = || Pipeline::new().authenticate(services.sessions.clone());

    Router::new()
        .nest("/api/v1/auth", auth::router(services))
        .nest("/api/v1/roles", roles::router(services))
        .route("/api/v1/whoami", authenticated().apply(get(system::whoami)))
        .route("/ws", authenticated().apply(get(push::ws_handler)))
}
