use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use gatehouse_auth::{roles, AuthorizationEngine, AuthzStore, InMemoryStore, SessionManager, UserStore};
use gatehouse_core::{DomainError, DomainResult};
use gatehouse_infra::PgStore;

use crate::app::errors::{ApiError, ApiResult};
use crate::config::GatewayConfig;
use crate::push::ConnectionRegistry;
use crate::rate_limit::RateLimiter;

/// Upper bound on a single proxied request.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

const PG_MAX_CONNECTIONS: u32 = 10;

/// Everything handlers and guards share, built once at startup.
pub struct AppServices {
    pub config: GatewayConfig,
    pub sessions: SessionManager,
    pub engine: Arc<AuthorizationEngine>,
    pub users: Arc<dyn UserStore>,
    pub http: reqwest::Client,
    pub registry: Arc<ConnectionRegistry>,
    pub limiter: Arc<RateLimiter>,
}

impl AppServices {
    pub fn new(
        config: GatewayConfig,
        authz: Arc<dyn AuthzStore>,
        users: Arc<dyn UserStore>,
    ) -> anyhow::Result<Self> {
        let sessions = SessionManager::new(&config.jwt_secret)?;
        let engine = Arc::new(AuthorizationEngine::new(authz).with_timeout(config.store_timeout));
        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let limiter = Arc::new(RateLimiter::new(config.rate_limit));

        Ok(Self {
            config,
            sessions,
            engine,
            users,
            http,
            registry: Arc::new(ConnectionRegistry::new()),
            limiter,
        })
    }

    /// Run a user store call under the store timeout. Timeouts and store
    /// outages become internal errors.
    pub async fn user_call<T, F>(&self, operation: &'static str, call: F) -> ApiResult<T>
    where
        F: Future<Output = DomainResult<T>>,
    {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result.map_err(|err| match err {
                DomainError::Unavailable(reason) => ApiError::internal(operation, reason),
                other => other.into(),
            }),
            Err(_) => Err(ApiError::internal(operation, "store call timed out")),
        }
    }
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Postgres when `DATABASE_URL` is set, otherwise an in-memory store seeded
/// with the default roles.
pub async fn build_services(config: GatewayConfig) -> anyhow::Result<AppServices> {
    match config.database_url.clone() {
        Some(url) => build_persistent_services(config, &url).await,
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store (data is lost on restart)");
            build_in_memory_services(config).await
        }
    }
}

async fn build_persistent_services(config: GatewayConfig, url: &str) -> anyhow::Result<AppServices> {
    let store = Arc::new(PgStore::connect(url, PG_MAX_CONNECTIONS).await?);
    store.ensure_schema().await?;
    tracing::info!("connected to postgres");
    AppServices::new(config, store.clone(), store)
}

pub async fn build_in_memory_services(config: GatewayConfig) -> anyhow::Result<AppServices> {
    let store = Arc::new(InMemoryStore::new());
    seed_default_roles(store.as_ref()).await?;
    AppServices::new(config, store.clone(), store)
}

/// Ensure the `admin` and `user` roles exist.
pub async fn seed_default_roles(store: &dyn AuthzStore) -> DomainResult<()> {
    for (name, description) in [
        (roles::ADMIN, "Full access to the gateway"),
        (roles::USER, "Regular user"),
    ] {
        match store.create_role(name, description).await {
            Ok(_) | Err(DomainError::Conflict(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
