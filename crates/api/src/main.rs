use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gatehouse_observability::init();

    let config = gatehouse_api::GatewayConfig::from_env();
    let bind_addr = config.bind_addr.clone();

    let services = Arc::new(gatehouse_api::build_services(config).await?);

    #[cfg(feature = "redis")]
    {
        if let Some(url) = services.config.redis_url.as_deref() {
            gatehouse_api::push::start_evaluation_bridge(url, services.registry.clone())?;
        }
    }
    #[cfg(not(feature = "redis"))]
    {
        if services.config.redis_url.is_some() {
            tracing::warn!("REDIS_URL set but redis feature not enabled; evaluation push disabled");
        }
    }

    let app = gatehouse_api::build_app(services);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
