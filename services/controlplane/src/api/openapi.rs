//! OpenAPI schema aggregation for the RBAC API.
//!
//! # Purpose
//! Collects all routes and schema types into a single OpenAPI document for docs
//! and client generation.
use crate::api::{
    keys, permissions, resolve, roles, system,
    types::{
        ErrorResponse, HealthStatus, KeyRbacReplaceRequest, PermissionCreateRequest,
        PermissionListResponse, PermissionUpdateRequest, PermissionUpsertRequest,
        RoleCreateRequest, RoleCreateResponse, RoleDeleteRequest, RoleDeleteResponse, RoleIds,
        RoleListResponse, RoleUpdateRequest, SlugsRequest,
    },
};
use crate::model::{Permission, Role};
use crate::rbac::{
    EffectivePermission, KeyRbacReplaced, KeyRbacView, PermissionSource, PermissionSummary,
    ResolvedKey, ResolvedRole, RoleRbacView, SlugBreakdown, SlugResolution,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "keygate-controlplane",
        version = "v1",
        description = "Workspace-scoped roles, permissions, and key authorization"
    ),
    paths(
        system::system_health,
        permissions::list_permissions,
        permissions::create_permission,
        permissions::upsert_permissions,
        permissions::get_permission,
        permissions::update_permission,
        permissions::delete_permission,
        roles::list_roles,
        roles::create_role,
        roles::delete_roles,
        roles::get_role,
        roles::update_role,
        roles::delete_role,
        roles::connect_permission,
        roles::disconnect_permission,
        roles::role_rbac,
        keys::connect_role,
        keys::disconnect_role,
        keys::connect_permission,
        keys::disconnect_permission,
        keys::replace_rbac,
        keys::key_rbac,
        resolve::resolve_slugs
    ),
    components(schemas(
        ErrorResponse,
        HealthStatus,
        Permission,
        Role,
        PermissionListResponse,
        PermissionCreateRequest,
        PermissionUpdateRequest,
        PermissionUpsertRequest,
        RoleListResponse,
        RoleCreateRequest,
        RoleCreateResponse,
        RoleUpdateRequest,
        RoleIds,
        RoleDeleteRequest,
        RoleDeleteResponse,
        KeyRbacReplaceRequest,
        KeyRbacReplaced,
        KeyRbacView,
        RoleRbacView,
        EffectivePermission,
        PermissionSource,
        PermissionSummary,
        ResolvedRole,
        ResolvedKey,
        SlugsRequest,
        SlugResolution,
        SlugBreakdown
    )),
    tags(
        (name = "system", description = "Health"),
        (name = "permissions", description = "Permission management"),
        (name = "roles", description = "Role management and role-permission links"),
        (name = "keys", description = "Key authorization"),
        (name = "rbac", description = "Permission resolution")
    )
)]
pub struct ApiDoc;
