//! HTTP API request/response types.
//!
//! # Purpose
//! Defines the JSON payload shapes of the RBAC REST API and their OpenAPI
//! schemas. Field names are camelCase on the wire.
use crate::model::{Permission, Role};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthStatus {
    pub status: String,
    pub backend: String,
    pub durable: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PermissionListResponse {
    pub items: Vec<Permission>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct PermissionCreateRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Full update; an absent description clears it.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct PermissionUpdateRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct PermissionUpsertRequest {
    pub names: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RoleListResponse {
    pub items: Vec<Role>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RoleCreateRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permission_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RoleCreateResponse {
    pub role_id: String,
}

/// Patch; absent fields are left untouched.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Default)]
pub struct RoleUpdateRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A single role id or a list of them.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
#[serde(untagged)]
pub enum RoleIds {
    One(String),
    Many(Vec<String>),
}

impl RoleIds {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            RoleIds::One(id) => vec![id],
            RoleIds::Many(ids) => ids,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RoleDeleteRequest {
    pub role_ids: RoleIds,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RoleDeleteResponse {
    pub deleted_count: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct KeyRbacReplaceRequest {
    #[serde(default)]
    pub role_ids: Vec<String>,
    #[serde(default)]
    pub direct_permission_ids: Vec<String>,
    /// Fail with 409 unless the key's authorization version still matches.
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SlugsRequest {
    #[serde(default)]
    pub role_ids: Vec<String>,
    #[serde(default)]
    pub permission_ids: Vec<String>,
}
