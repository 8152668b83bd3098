//! Key authorization handlers.
//!
//! # Purpose
//! Attach and detach roles and direct permissions on a key, replace a key's
//! whole authorization state, and read its effective permissions.
//!
//! # Key invariants and assumptions
//! - Keys themselves are managed elsewhere; a missing or soft-deleted key is 404.
//! - `PUT /v1/keys/{key_id}/rbac` is a full replace, not a merge.
use crate::api::context::RequestScope;
use crate::api::error::ApiError;
use crate::api::types::KeyRbacReplaceRequest;
use crate::app::AppState;
use crate::rbac::{KeyRbacReplaced, KeyRbacView, ReplaceKeyRbac};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};

#[utoipa::path(
    put,
    path = "/v1/keys/{key_id}/roles/{role_id}",
    tag = "keys",
    params(
        ("key_id" = String, Path, description = "Key identifier"),
        ("role_id" = String, Path, description = "Role identifier")
    ),
    responses(
        (status = 204, description = "Role attached (idempotent)"),
        (status = 404, description = "Key or role not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn connect_role(
    Path((key_id, role_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    state
        .rbac
        .connect_role_to_key(&scope.ctx, &key_id, &role_id)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/keys/{key_id}/roles/{role_id}",
    tag = "keys",
    params(
        ("key_id" = String, Path, description = "Key identifier"),
        ("role_id" = String, Path, description = "Role identifier")
    ),
    responses(
        (status = 204, description = "Role detached, or was not attached"),
        (status = 404, description = "Key not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn disconnect_role(
    Path((key_id, role_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    state
        .rbac
        .disconnect_role_from_key(&scope.ctx, &key_id, &role_id)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/v1/keys/{key_id}/permissions/{permission_id}",
    tag = "keys",
    params(
        ("key_id" = String, Path, description = "Key identifier"),
        ("permission_id" = String, Path, description = "Permission identifier")
    ),
    responses(
        (status = 204, description = "Permission attached (idempotent)"),
        (status = 404, description = "Key or permission not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn connect_permission(
    Path((key_id, permission_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    state
        .rbac
        .connect_permission_to_key(&scope.ctx, &key_id, &permission_id)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/keys/{key_id}/permissions/{permission_id}",
    tag = "keys",
    params(
        ("key_id" = String, Path, description = "Key identifier"),
        ("permission_id" = String, Path, description = "Permission identifier")
    ),
    responses(
        (status = 204, description = "Permission detached, or was not attached"),
        (status = 404, description = "Key not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn disconnect_permission(
    Path((key_id, permission_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    state
        .rbac
        .disconnect_permission_from_key(&scope.ctx, &key_id, &permission_id)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/v1/keys/{key_id}/rbac",
    tag = "keys",
    params(("key_id" = String, Path, description = "Key identifier")),
    request_body = KeyRbacReplaceRequest,
    responses(
        (status = 200, description = "Authorization state replaced", body = KeyRbacReplaced),
        (status = 400, description = "Unknown role or permission ids; nothing changed", body = crate::api::types::ErrorResponse),
        (status = 404, description = "Key not found", body = crate::api::types::ErrorResponse),
        (status = 409, description = "Authorization version changed", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn replace_rbac(
    Path(key_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<KeyRbacReplaceRequest>,
) -> Result<Json<KeyRbacReplaced>, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    let outcome = state
        .rbac
        .replace_key_rbac(
            &scope.ctx,
            &key_id,
            ReplaceKeyRbac {
                role_ids: body.role_ids,
                permission_ids: body.direct_permission_ids,
                expected_version: body.expected_version,
            },
        )
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(Json(outcome))
}

#[utoipa::path(
    get,
    path = "/v1/keys/{key_id}/rbac",
    tag = "keys",
    params(("key_id" = String, Path, description = "Key identifier")),
    responses(
        (status = 200, description = "Roles and effective permissions with provenance", body = KeyRbacView),
        (status = 404, description = "Key not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn key_rbac(
    Path(key_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<KeyRbacView>, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    let view = state
        .rbac
        .resolve_by_key(&scope.ctx, &key_id)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(Json(view))
}
