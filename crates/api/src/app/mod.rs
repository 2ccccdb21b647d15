//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, engine, session manager and shared clients
//! - `routes/`: locally handled endpoints (one file per area)
//! - `dto.rs`: request bodies and their validation rules
//! - `errors.rs`: error taxonomy and the response envelope

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{gateway, middleware};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Layers run outermost first: tracing, CORS, rate limiting, then the
/// per-route guard pipelines.
pub fn build_app(services: Arc<services::AppServices>) -> Router {
    let cors = middleware::cors_layer(&services.config.cors_origins);
    let limiter = services.limiter.clone();

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router(&services))
        .merge(gateway::router(&services))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(axum::middleware::from_fn_with_state(
                    limiter,
                    middleware::rate_limit_middleware,
                ))
                .layer(Extension(services)),
        )
}
