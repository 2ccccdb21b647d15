//! Per-route guard pipeline.
//!
//! A [`Pipeline`] is an ordered list of [`Guard`]s attached to a route with
//! [`Pipeline::apply`]. Guards run in insertion order against the same
//! [`RequestContext`]; the first rejection short-circuits the request and
//! nothing after it (guards or handler) runs. Router-wide concerns (CORS,
//! rate limiting) are layers in `app` and run before any pipeline.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::MethodRouter,
    RequestExt,
};
use serde::de::DeserializeOwned;

use gatehouse_auth::{roles, AuthorizationEngine, SessionManager};
use gatehouse_core::UserId;

use crate::app::errors::ApiError;
use crate::context::{RequestContext, Validated};
use crate::validation::Validate;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "access_token";

/// Largest body the validate guard will buffer.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// One step of the pipeline.
#[async_trait]
pub trait Guard: Send + Sync {
    fn name(&self) -> &'static str;

    /// Forward (`Ok`) or reject. A guard may enrich `ctx` or the request
    /// extensions for the guards after it.
    async fn check(&self, req: &mut Request<Body>, ctx: &mut RequestContext) -> Result<(), ApiError>;
}

#[derive(Clone, Default)]
pub struct Pipeline {
    guards: Vec<Arc<dyn Guard>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(mut self, guard: impl Guard + 'static) -> Self {
        self.guards.push(Arc::new(guard));
        self
    }

    pub fn authenticate(self, sessions: SessionManager) -> Self {
        self.guard(Authenticate { sessions })
    }

    pub fn require_all_roles(self, engine: Arc<AuthorizationEngine>, roles: &[&str]) -> Self {
        self.guard(RequireRoles::new(engine, roles, RoleMatch::All))
    }

    pub fn require_any_role(self, engine: Arc<AuthorizationEngine>, roles: &[&str]) -> Self {
        self.guard(RequireRoles::new(engine, roles, RoleMatch::Any))
    }

    /// Allow admins, or `user`s whose id equals the path parameter `param`.
    pub fn require_self_or_admin(self, engine: Arc<AuthorizationEngine>, param: &'static str) -> Self {
        self.guard(RequireSelfOrAdmin { engine, param })
    }

    pub fn validate<T>(self) -> Self
    where
        T: DeserializeOwned + Validate + Clone + Send + Sync + 'static,
    {
        self.guard(ValidateBody::<T> {
            limit: MAX_BODY_BYTES,
            _body: PhantomData,
        })
    }

    #[cfg(test)]
    fn guard_names(&self) -> Vec<&'static str> {
        self.guards.iter().map(|g| g.name()).collect()
    }

    /// Run every guard. On success the principal (if any) is placed in the
    /// request extensions for the handler.
    pub async fn run(&self, mut req: Request<Body>) -> Result<Request<Body>, ApiError> {
        let mut ctx = RequestContext::new();

        for guard in &self.guards {
            if let Err(err) = guard.check(&mut req, &mut ctx).await {
                tracing::debug!(
                    guard = guard.name(),
                    method = %req.method(),
                    path = %req.uri().path(),
                    error_code = err.error_code(),
                    "request rejected by guard"
                );
                return Err(err);
            }
        }

        if let Some(principal) = ctx.into_principal() {
            req.extensions_mut().insert(principal);
        }
        Ok(req)
    }

    /// Attach the pipeline to every method of `route`.
    pub fn apply<S>(self, route: MethodRouter<S>) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        route.route_layer(axum::middleware::from_fn_with_state(Arc::new(self), enforce))
    }
}

pub async fn enforce(State(pipeline): State<Arc<Pipeline>>, req: Request<Body>, next: Next) -> Response {
    match pipeline.run(req).await {
        Ok(req) => next.run(req).await,
        Err(err) => err.into_response(),
    }
}

// -------------------------
// Authenticate
// -------------------------

struct Authenticate {
    sessions: SessionManager,
}

#[async_trait]
impl Guard for Authenticate {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    async fn check(&self, req: &mut Request<Body>, ctx: &mut RequestContext) -> Result<(), ApiError> {
        let token = credential(req.headers()).ok_or_else(|| ApiError::unauthenticated("Token not found"))?;
        let principal = self.sessions.verify(&token).map_err(|e| {
            tracing::debug!(error = %e, "session token rejected");
            ApiError::unauthenticated("Invalid token")
        })?;
        ctx.set_principal(principal);
        Ok(())
    }
}

/// Token from the `Authorization` header, else the session cookie, with an
/// optional `Bearer ` prefix removed.
pub fn credential(headers: &HeaderMap) -> Option<String> {
    let raw = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| cookie(headers, SESSION_COOKIE))?;

    let token = raw.strip_prefix("Bearer ").unwrap_or(&raw).trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// -------------------------
// Authorize
// -------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoleMatch {
    All,
    Any,
}

struct RequireRoles {
    engine: Arc<AuthorizationEngine>,
    roles: Vec<String>,
    mode: RoleMatch,
}

impl RequireRoles {
    fn new(engine: Arc<AuthorizationEngine>, roles: &[&str], mode: RoleMatch) -> Self {
        Self {
            engine,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            mode,
        }
    }
}

#[async_trait]
impl Guard for RequireRoles {
    fn name(&self) -> &'static str {
        match self.mode {
            RoleMatch::All => "require_all_roles",
            RoleMatch::Any => "require_any_role",
        }
    }

    async fn check(&self, _req: &mut Request<Body>, ctx: &mut RequestContext) -> Result<(), ApiError> {
        let subject = ctx
            .principal()
            .map(|p| p.subject_id())
            .ok_or_else(|| ApiError::unauthenticated("Token not found"))?;

        let allowed = match self.mode {
            RoleMatch::All => self.engine.has_all_roles(subject, &self.roles).await?,
            RoleMatch::Any => self.engine.has_any_role(subject, &self.roles).await?,
        };

        if allowed { Ok(()) } else { Err(ApiError::Unauthorized) }
    }
}

struct RequireSelfOrAdmin {
    engine: Arc<AuthorizationEngine>,
    param: &'static str,
}

#[async_trait]
impl Guard for RequireSelfOrAdmin {
    fn name(&self) -> &'static str {
        "require_self_or_admin"
    }

    async fn check(&self, req: &mut Request<Body>, ctx: &mut RequestContext) -> Result<(), ApiError> {
        let subject = ctx
            .principal()
            .map(|p| p.subject_id())
            .ok_or_else(|| ApiError::unauthenticated("Token not found"))?;

        let Path(params) = req
            .extract_parts::<Path<HashMap<String, String>>>()
            .await
            .map_err(|_| ApiError::bad_request("Invalid user id"))?;
        let target: UserId = params
            .get(self.param)
            .ok_or_else(|| ApiError::bad_request("Invalid user id"))?
            .parse()
            .map_err(|_| ApiError::bad_request("Invalid user id"))?;

        let held = self.engine.user_roles(subject).await?;
        if roles::contains_role(&held, roles::ADMIN) {
            return Ok(());
        }
        if roles::contains_role(&held, roles::USER) && target == subject {
            return Ok(());
        }
        Err(ApiError::Forbidden)
    }
}

// -------------------------
// Validate
// -------------------------

struct ValidateBody<T> {
    limit: usize,
    _body: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T> Guard for ValidateBody<T>
where
    T: DeserializeOwned + Validate + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "validate"
    }

    async fn check(&self, req: &mut Request<Body>, _ctx: &mut RequestContext) -> Result<(), ApiError> {
        let body = std::mem::take(req.body_mut());
        let bytes = axum::body::to_bytes(body, self.limit)
            .await
            .map_err(|e| ApiError::InvalidBody(e.to_string()))?;

        let payload: T =
            serde_json::from_slice(&bytes).map_err(|e| ApiError::InvalidBody(e.to_string()))?;
        payload.validate().map_err(ApiError::Validation)?;

        req.extensions_mut().insert(Validated(payload));
        *req.body_mut() = Body::from(bytes);
        Ok(())
    }
}
