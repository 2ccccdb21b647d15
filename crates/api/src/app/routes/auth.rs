//! Sign-up, sign-in and session endpoints under `/api/v1/auth`.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{header, HeaderValue, StatusCode},
    response::Response,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use gatehouse_auth::{hash_password, roles, verify_password, NewUser, Principal};
use gatehouse_core::UserId;

use crate::app::dto::{CreateUserRequest, LoginRequest};
use crate::app::errors::{success, ApiError, ApiResult};
use crate::app::services::AppServices;
use crate::context::Validated;
use crate::pipeline::{Pipeline, SESSION_COOKIE};

pub fn router(services: &Arc<AppServices>) -> Router {
    let authenticated = || Pipeline::new().authenticate(services.sessions.clone());

    Router::new()
        .route(
            "/signup",
            Pipeline::new().validate::<CreateUserRequest>().apply(post(signup)),
        )
        .route(
            "/signin",
            Pipeline::new().validate::<LoginRequest>().apply(post(signin)),
        )
        .route("/validate-session", authenticated().apply(get(validate_session)))
        .route("/logout", authenticated().apply(get(logout)))
        .route(
            "/user/:id",
            authenticated()
                .require_self_or_admin(services.engine.clone(), "id")
                .apply(get(get_user)),
        )
        .route(
            "/users",
            authenticated()
                .require_all_roles(services.engine.clone(), &[roles::ADMIN])
                .apply(get(list_users)),
        )
}

/// POST /api/v1/auth/signup
pub async fn signup(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(Validated(body)): Extension<Validated<CreateUserRequest>>,
) -> ApiResult<Response> {
    let password_hash =
        hash_password(&body.password).map_err(|e| ApiError::internal("hash_password", e))?;

    let user = services
        .user_call(
            "create_user",
            services.users.create_user(NewUser {
                email: body.email.trim().to_string(),
                username: body.username.trim().to_string(),
                password_hash,
            }),
        )
        .await?;

    tracing::info!(user_id = %user.id, "user created");
    Ok(success(StatusCode::OK, "User created successfully", user))
}

/// POST /api/v1/auth/signin
pub async fn signin(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(Validated(body)): Extension<Validated<LoginRequest>>,
) -> ApiResult<Response> {
    let user = services
        .user_call("user_by_email", services.users.user_by_email(body.email.trim()))
        .await?;

    if !verify_password(&user.password_hash, &body.password) {
        return Err(ApiError::bad_request("invalid credentials"));
    }

    let roles = services.engine.user_roles(user.id).await?;
    let token = services.sessions.issue(user.id, &user.email)?;

    tracing::info!(user_id = %user.id, "user signed in");
    let response = success(
        StatusCode::OK,
        "User logged in successfully",
        json!({ "user": user, "roles": roles, "token": token }),
    );
    with_cookie(response, &session_cookie(&token, Utc::now()))
}

/// GET /api/v1/auth/validate-session
///
/// Reloads the user and roles and re-issues the token.
pub async fn validate_session(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Response> {
    let user = services
        .user_call("user_by_id", services.users.user_by_id(principal.subject_id()))
        .await?;
    let roles = services.engine.user_roles(user.id).await?;
    let token = services.sessions.issue(user.id, &user.email)?;

    let response = success(
        StatusCode::OK,
        "User session validated successfully",
        json!({ "user": user, "roles": roles, "token": token }),
    );
    with_cookie(response, &session_cookie(&token, Utc::now()))
}

/// GET /api/v1/auth/logout
pub async fn logout(Extension(principal): Extension<Principal>) -> ApiResult<Response> {
    tracing::info!(user_id = %principal.subject_id(), "user logged out");
    let response = success(StatusCode::OK, "User logged out successfully", Value::Null);
    with_cookie(response, &expired_cookie(Utc::now()))
}

/// GET /api/v1/auth/user/:id
pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id: UserId = id.parse().map_err(|_| ApiError::bad_request("Invalid user id"))?;
    let user = services.user_call("user_by_id", services.users.user_by_id(id)).await?;
    Ok(success(StatusCode::OK, "User fetched successfully", user))
}

/// GET /api/v1/auth/users
pub async fn list_users(Extension(services): Extension<Arc<AppServices>>) -> ApiResult<Response> {
    let users = services.user_call("all_users", services.users.all_users()).await?;
    Ok(success(StatusCode::OK, "Users fetched successfully", users))
}

// -------------------------
// Cookies
// -------------------------

fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn session_cookie(token: &str, now: DateTime<Utc>) -> String {
    format!(
        "{SESSION_COOKIE}={token}; HttpOnly; Path=/; Expires={}",
        http_date(now + Duration::hours(24))
    )
}

fn expired_cookie(now: DateTime<Utc>) -> String {
    format!(
        "{SESSION_COOKIE}=; HttpOnly; Path=/; Max-Age=-1; Expires={}",
        http_date(now - Duration::hours(24))
    )
}

fn with_cookie(mut response: Response, cookie: &str) -> ApiResult<Response> {
    let value = HeaderValue::from_str(cookie).map_err(|e| ApiError::internal("set_cookie", e))?;
    response.headers_mut().append(header::SET_COOKIE, value);
    Ok(response)
}
