//! Permission API handlers.
//!
//! # Purpose
//! CRUD and batch get-or-create endpoints for workspace permissions.
use crate::api::context::RequestScope;
use crate::api::error::ApiError;
use crate::api::types::{
    PermissionCreateRequest, PermissionListResponse, PermissionUpdateRequest,
    PermissionUpsertRequest,
};
use crate::app::AppState;
use crate::model::Permission;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;

#[utoipa::path(
    get,
    path = "/v1/permissions",
    tag = "permissions",
    responses(
        (status = 200, description = "List permissions", body = PermissionListResponse),
        (status = 401, description = "Missing workspace", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn list_permissions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PermissionListResponse>, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    let items = state
        .rbac
        .list_permissions(&scope.ctx)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(Json(PermissionListResponse { items }))
}

#[utoipa::path(
    post,
    path = "/v1/permissions",
    tag = "permissions",
    request_body = PermissionCreateRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 400, description = "Invalid name", body = crate::api::types::ErrorResponse),
        (status = 409, description = "Permission already exists", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn create_permission(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PermissionCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    let permission = state
        .rbac
        .create_permission(&scope.ctx, &body.name, body.description)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok((StatusCode::CREATED, Json(permission)))
}

#[utoipa::path(
    post,
    path = "/v1/permissions/upsert",
    tag = "permissions",
    request_body = PermissionUpsertRequest,
    responses(
        (status = 200, description = "Existing or newly created permissions, in input order", body = PermissionListResponse),
        (status = 400, description = "Blank name", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn upsert_permissions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PermissionUpsertRequest>,
) -> Result<Json<PermissionListResponse>, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    let items = state
        .rbac
        .upsert_permissions(&scope.ctx, &body.names)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(Json(PermissionListResponse { items }))
}

#[utoipa::path(
    get,
    path = "/v1/permissions/{permission_id}",
    tag = "permissions",
    params(("permission_id" = String, Path, description = "Permission identifier")),
    responses(
        (status = 200, description = "Permission", body = Permission),
        (status = 404, description = "Permission not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_permission(
    Path(permission_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Permission>, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    let permission = state
        .rbac
        .get_permission(&scope.ctx, &permission_id)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(Json(permission))
}

#[utoipa::path(
    patch,
    path = "/v1/permissions/{permission_id}",
    tag = "permissions",
    params(("permission_id" = String, Path, description = "Permission identifier")),
    request_body = PermissionUpdateRequest,
    responses(
        (status = 204, description = "Permission updated"),
        (status = 404, description = "Permission not found", body = crate::api::types::ErrorResponse),
        (status = 409, description = "Name taken", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn update_permission(
    Path(permission_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PermissionUpdateRequest>,
) -> Result<StatusCode, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    state
        .rbac
        .update_permission(&scope.ctx, &permission_id, &body.name, body.description)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/permissions/{permission_id}",
    tag = "permissions",
    params(("permission_id" = String, Path, description = "Permission identifier")),
    responses(
        (status = 204, description = "Permission and its links deleted"),
        (status = 404, description = "Permission not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn delete_permission(
    Path(permission_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    state
        .rbac
        .delete_permission(&scope.ctx, &permission_id)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(StatusCode::NO_CONTENT)
}
