//! Path-prefix reverse proxy to the backend services.
//!
//! Each [`ProxyRoute`] owns a prefix and an upstream. Reads require any of
//! `user`/`admin`; writes (where routed at all) require `admin`. The original
//! path and query are forwarded untouched with the caller's id in
//! `X-User-ID`; the request is sent once and never retried.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::Extension,
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, Uri},
    response::{IntoResponse, Response},
    routing::{get, post, MethodRouter},
    Router,
};
use reqwest::Url;

use gatehouse_auth::{roles, Principal};

use crate::app::errors::{ApiError, ApiResult};
use crate::app::services::AppServices;
use crate::config::GatewayConfig;
use crate::pipeline::Pipeline;

/// Identity header set on every proxied request.
pub const USER_ID_HEADER: &str = "x-user-id";

const MAX_PROXY_BODY: usize = 8 * 1024 * 1024;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A configured upstream. Parse failures are kept and surface as 502 when a
/// request is routed to it.
#[derive(Debug, Clone)]
pub struct Upstream {
    name: &'static str,
    base: Result<Url, String>,
}

impl Upstream {
    pub fn parse(name: &'static str, raw: &str) -> Self {
        let base = Url::parse(raw.trim())
            .map_err(|e| e.to_string())
            .and_then(|url| match url.scheme() {
                "http" | "https" if url.host_str().is_some() => Ok(url),
                other => Err(format!("unsupported upstream url (scheme {other:?})")),
            });
        if let Err(reason) = &base {
            tracing::warn!(upstream = name, url = raw, reason = %reason, "invalid upstream url");
        }
        Self { name, base }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn base(&self) -> Result<&Url, &str> {
        self.base.as_ref().map_err(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct ProxyRoute {
    pub prefix: &'static str,
    pub upstream: Upstream,
    pub allow_writes: bool,
}

/// The gateway's proxy table.
pub fn route_table(config: &GatewayConfig) -> Vec<ProxyRoute> {
    let problem = Upstream::parse("problem", &config.problem_service);
    let submission = Upstream::parse("submission", &config.submission_service);

    vec![
        ProxyRoute {
            prefix: "/api/v1/problem",
            upstream: problem.clone(),
            allow_writes: true,
        },
        ProxyRoute {
            prefix: "/api/v1/company",
            upstream: problem.clone(),
            allow_writes: true,
        },
        ProxyRoute {
            prefix: "/api/v1/explanation",
            upstream: problem,
            allow_writes: false,
        },
        ProxyRoute {
            prefix: "/api/v1/submission",
            upstream: submission,
            allow_writes: true,
        },
    ]
}

/// Routes for every prefix: the bare prefix, with a trailing slash, and
/// everything below it.
pub fn router(services: &Arc<AppServices>) -> Router {
    let mut router = Router::new();

    for route in route_table(&services.config) {
        let route = Arc::new(route);
        let methods = method_router(services, route.clone());
        router = router
            .route(route.prefix, methods.clone())
            .route(&format!("{}/", route.prefix), methods.clone())
            .route(&format!("{}/*rest", route.prefix), methods);
    }

    router
}

fn method_router(services: &Arc<AppServices>, route: Arc<ProxyRoute>) -> MethodRouter {
    let allow_writes = route.allow_writes;
    let handler = move |Extension(services): Extension<Arc<AppServices>>, req: Request<Body>| {
        let route = route.clone();
        async move {
            match forward(&services.http, &route, req).await {
                Ok(response) => response,
                Err(err) => err.into_response(),
            }
        }
    };

    let reads = Pipeline::new()
        .authenticate(services.sessions.clone())
        .require_any_role(services.engine.clone(), &[roles::USER, roles::ADMIN]);
    let methods = reads.apply(get(handler.clone()));

    if !allow_writes {
        return methods;
    }

    let writes = Pipeline::new()
        .authenticate(services.sessions.clone())
        .require_any_role(services.engine.clone(), &[roles::ADMIN]);
    methods.merge(writes.apply(
        post(handler.clone())
            .put(handler.clone())
            .patch(handler.clone())
            .delete(handler),
    ))
}

/// Send `req` to the route's upstream and relay the answer.
pub async fn forward(http: &reqwest::Client, route: &ProxyRoute, req: Request<Body>) -> ApiResult<Response> {
    let subject = req
        .extensions()
        .get::<Principal>()
        .map(|p| p.subject_id())
        .ok_or_else(|| ApiError::unauthenticated("Token not found"))?;

    let base = route.upstream.base().map_err(|reason| {
        tracing::error!(upstream = route.upstream.name(), reason, "upstream url unusable");
        ApiError::gateway(reason)
    })?;
    let target = target_url(base, req.uri());

    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, MAX_PROXY_BODY)
        .await
        .map_err(|e| ApiError::bad_request(format!("unreadable request body: {e}")))?;

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers.insert(
        HeaderName::from_static(USER_ID_HEADER),
        HeaderValue::from(subject.get()),
    );

    tracing::info!(
        method = %parts.method,
        original_path = %parts.uri.path(),
        target_host = target.host_str().unwrap_or_default(),
        upstream = route.upstream.name(),
        "proxying request"
    );

    let upstream = http
        .request(parts.method, target)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            tracing::error!(upstream = route.upstream.name(), error = %e, "upstream request failed");
            ApiError::gateway(e.to_string())
        })?;

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);
    let body = upstream.bytes().await.map_err(|e| {
        tracing::error!(upstream = route.upstream.name(), error = %e, "upstream body failed");
        ApiError::gateway(e.to_string())
    })?;

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// `base`'s scheme, host and port with `uri`'s path and query.
fn target_url(base: &Url, uri: &Uri) -> Url {
    let mut url = base.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    url
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in HOP_BY_HOP.iter().copied().chain(listed.iter().map(String::as_str)) {
        headers.remove(name);
    }
}
