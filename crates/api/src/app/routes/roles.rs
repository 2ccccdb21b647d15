//! Role administration under `/api/v1/roles`. Every route requires `admin`.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Response,
    routing::{delete, get, post, put},
    Router,
};
use serde_json::Value;

use gatehouse_auth::{roles, RoleUpdate};
use gatehouse_core::{AssignmentId, RoleId, UserId};

use crate::app::dto::{CreateRoleRequest, RoleNameQuery, UpdateRoleRequest};
use crate::app::errors::{success, ApiError, ApiResult};
use crate::app::services::AppServices;
use crate::context::Validated;
use crate::pipeline::Pipeline;

pub fn router(services: &Arc<AppServices>) -> Router {
    let admin = || {
        Pipeline::new()
            .authenticate(services.sessions.clone())
            .require_all_roles(services.engine.clone(), &[roles::ADMIN])
    };

    Router::new()
        .route(
            "/",
            admin().validate::<CreateRoleRequest>().apply(post(create_role)),
        )
        .route("/roles", admin().apply(get(list_roles)))
        .route("/name", admin().apply(get(role_by_name)))
        .route("/permissions", admin().apply(get(all_role_permissions)))
        .route("/permissions/:id", admin().apply(get(role_permissions)))
        .route("/assign/:user_id/:role_id", admin().apply(post(assign_role)))
        .route("/remove/:user_role_id", admin().apply(delete(remove_role)))
        .route(
            "/:id",
            admin().apply(get(role_by_id)).merge(
                admin()
                    .validate::<UpdateRoleRequest>()
                    .apply(put(update_role)),
            ),
        )
}

fn role_id(raw: &str) -> ApiResult<RoleId> {
    raw.parse().map_err(|_| ApiError::bad_request("Invalid role id"))
}

/// POST /api/v1/roles
pub async fn create_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(Validated(body)): Extension<Validated<CreateRoleRequest>>,
) -> ApiResult<Response> {
    let role = services
        .engine
        .create_role(&body.name, body.description.as_deref().unwrap_or_default())
        .await?;
    tracing::info!(role_id = %role.id, role = %role.name, "role created");
    Ok(success(StatusCode::OK, "Role created successfully", role))
}

/// PUT /api/v1/roles/:id
pub async fn update_role(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Extension(Validated(body)): Extension<Validated<UpdateRoleRequest>>,
) -> ApiResult<Response> {
    let id = role_id(&id)?;
    let update = RoleUpdate {
        name: body.name,
        description: body.description,
    };
    let role = services.engine.update_role(id, &update).await?;
    Ok(success(StatusCode::OK, "Role updated successfully", role))
}

/// GET /api/v1/roles/:id
pub async fn role_by_id(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let role = services.engine.role_by_id(role_id(&id)?).await?;
    Ok(success(StatusCode::OK, "Role fetched successfully", role))
}

/// GET /api/v1/roles/name?query=
pub async fn role_by_name(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<RoleNameQuery>,
) -> ApiResult<Response> {
    let name = params.query.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Invalid query"));
    }
    let role = services.engine.role_by_name(name).await?;
    Ok(success(StatusCode::OK, "Role fetched successfully", role))
}

/// GET /api/v1/roles/roles
pub async fn list_roles(Extension(services): Extension<Arc<AppServices>>) -> ApiResult<Response> {
    let roles = services.engine.all_roles().await?;
    Ok(success(StatusCode::OK, "Roles fetched successfully", roles))
}

/// GET /api/v1/roles/permissions/:id
pub async fn role_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let permissions = services.engine.role_permissions(role_id(&id)?).await?;
    Ok(success(StatusCode::OK, "Role permissions fetched successfully", permissions))
}

/// GET /api/v1/roles/permissions
pub async fn all_role_permissions(
    Extension(services): Extension<Arc<AppServices>>,
) -> ApiResult<Response> {
    let permissions = services.engine.all_role_permissions().await?;
    Ok(success(StatusCode::OK, "Roles permissions fetched successfully", permissions))
}

/// POST /api/v1/roles/assign/:user_id/:role_id
pub async fn assign_role(
    Extension(services): Extension<Arc<AppServices>>,
    Path((user_id, role)): Path<(String, String)>,
) -> ApiResult<Response> {
    let user: UserId = user_id.parse().map_err(|_| ApiError::bad_request("Invalid user id"))?;
    let role = role_id(&role)?;

    let assignment = services.engine.assign_role(user, role).await?;
    tracing::info!(user_id = %user, role_id = %role, assignment_id = %assignment.id, "role assigned");
    Ok(success(StatusCode::OK, "Role assigned successfully", assignment))
}

/// DELETE /api/v1/roles/remove/:user_role_id
pub async fn remove_role(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id: AssignmentId = id
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid user role id"))?;

    services.engine.remove_role(id).await?;
    tracing::info!(assignment_id = %id, "role removed");
    Ok(success(StatusCode::OK, "Role removed successfully", Value::Null))
}
