//! Role API handlers.
//!
//! # Purpose
//! Role CRUD, the bulk delete-with-relations path, role-permission links, and
//! the by-role resolution view.
use crate::api::context::RequestScope;
use crate::api::error::ApiError;
use crate::api::types::{
    RoleCreateRequest, RoleCreateResponse, RoleDeleteRequest, RoleDeleteResponse,
    RoleListResponse, RoleUpdateRequest,
};
use crate::app::AppState;
use crate::model::Role;
use crate::rbac::{CreateRole, RoleRbacView};
use crate::store::RolePatch;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;

#[utoipa::path(
    get,
    path = "/v1/roles",
    tag = "roles",
    responses(
        (status = 200, description = "List roles", body = RoleListResponse)
    )
)]
pub(crate) async fn list_roles(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RoleListResponse>, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    let items = state
        .rbac
        .list_roles(&scope.ctx)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(Json(RoleListResponse { items }))
}

#[utoipa::path(
    post,
    path = "/v1/roles",
    tag = "roles",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = RoleCreateResponse),
        (status = 400, description = "Unknown permission ids", body = crate::api::types::ErrorResponse),
        (status = 409, description = "Role already exists", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn create_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RoleCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    let role = state
        .rbac
        .create_role(
            &scope.ctx,
            CreateRole {
                name: body.name,
                description: body.description,
                permission_ids: body.permission_ids,
            },
        )
        .await
        .map_err(|err| scope.reject(err))?;
    Ok((
        StatusCode::CREATED,
        Json(RoleCreateResponse { role_id: role.id }),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/roles/delete",
    tag = "roles",
    request_body = RoleDeleteRequest,
    responses(
        (status = 200, description = "Roles and their links deleted", body = RoleDeleteResponse),
        (status = 400, description = "No role ids", body = crate::api::types::ErrorResponse),
        (status = 404, description = "Some roles not found; nothing deleted", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn delete_roles(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RoleDeleteRequest>,
) -> Result<Json<RoleDeleteResponse>, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    let deleted_count = state
        .rbac
        .delete_roles_with_relations(&scope.ctx, &body.role_ids.into_vec())
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(Json(RoleDeleteResponse { deleted_count }))
}

#[utoipa::path(
    get,
    path = "/v1/roles/{role_id}",
    tag = "roles",
    params(("role_id" = String, Path, description = "Role identifier")),
    responses(
        (status = 200, description = "Role", body = Role),
        (status = 404, description = "Role not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_role(
    Path(role_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Role>, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    let role = state
        .rbac
        .get_role(&scope.ctx, &role_id)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(Json(role))
}

#[utoipa::path(
    patch,
    path = "/v1/roles/{role_id}",
    tag = "roles",
    params(("role_id" = String, Path, description = "Role identifier")),
    request_body = RoleUpdateRequest,
    responses(
        (status = 204, description = "Role updated"),
        (status = 404, description = "Role not found", body = crate::api::types::ErrorResponse),
        (status = 409, description = "Name taken", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn update_role(
    Path(role_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RoleUpdateRequest>,
) -> Result<StatusCode, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    state
        .rbac
        .update_role(
            &scope.ctx,
            &role_id,
            RolePatch {
                name: body.name,
                description: body.description,
            },
        )
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/roles/{role_id}",
    tag = "roles",
    params(("role_id" = String, Path, description = "Role identifier")),
    responses(
        (status = 204, description = "Role and its links deleted"),
        (status = 404, description = "Role not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn delete_role(
    Path(role_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    state
        .rbac
        .delete_role(&scope.ctx, &role_id)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/v1/roles/{role_id}/permissions/{permission_id}",
    tag = "roles",
    params(
        ("role_id" = String, Path, description = "Role identifier"),
        ("permission_id" = String, Path, description = "Permission identifier")
    ),
    responses(
        (status = 204, description = "Permission attached (idempotent)"),
        (status = 404, description = "Role or permission not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn connect_permission(
    Path((role_id, permission_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    state
        .rbac
        .connect_permission_to_role(&scope.ctx, &role_id, &permission_id)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/roles/{role_id}/permissions/{permission_id}",
    tag = "roles",
    params(
        ("role_id" = String, Path, description = "Role identifier"),
        ("permission_id" = String, Path, description = "Permission identifier")
    ),
    responses(
        (status = 204, description = "Permission detached, or was not attached")
    )
)]
pub(crate) async fn disconnect_permission(
    Path((role_id, permission_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    state
        .rbac
        .disconnect_permission_from_role(&scope.ctx, &role_id, &permission_id)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/roles/{role_id}/rbac",
    tag = "roles",
    params(("role_id" = String, Path, description = "Role identifier")),
    responses(
        (status = 200, description = "Keys holding the role and its permissions", body = RoleRbacView),
        (status = 404, description = "Role not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn role_rbac(
    Path(role_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RoleRbacView>, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    let view = state
        .rbac
        .resolve_by_role(&scope.ctx, &role_id)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(Json(view))
}
