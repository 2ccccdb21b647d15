//! HTTP gateway: guard pipelines, local auth/role endpoints, the proxy
//! table and websocket push.

pub mod app;
pub mod config;
pub mod context;
pub mod gateway;
pub mod middleware;
pub mod pipeline;
pub mod push;
pub mod rate_limit;
pub mod validation;

pub use app::build_app;
pub use app::services::{build_services, AppServices};
pub use config::GatewayConfig;
