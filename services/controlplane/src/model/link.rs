//! Junction records for the key/role/permission graph.
//!
//! # Purpose
//! Each link carries its `workspace_id` so lookups never need to trust that
//! ids are globally unique. Links have no lifecycle of their own: connect
//! creates them, disconnect or a cascading endpoint delete removes them.
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct RolePermission {
    pub workspace_id: String,
    pub role_id: String,
    pub permission_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct KeyRole {
    pub workspace_id: String,
    pub key_id: String,
    pub role_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct KeyPermission {
    pub workspace_id: String,
    pub key_id: String,
    pub permission_id: String,
}

impl RolePermission {
    pub fn new(workspace_id: &str, role_id: &str, permission_id: &str) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            role_id: role_id.to_string(),
            permission_id: permission_id.to_string(),
        }
    }
}

impl KeyRole {
    pub fn new(workspace_id: &str, key_id: &str, role_id: &str) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            key_id: key_id.to_string(),
            role_id: role_id.to_string(),
        }
    }
}

impl KeyPermission {
    pub fn new(workspace_id: &str, key_id: &str, permission_id: &str) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            key_id: key_id.to_string(),
            permission_id: permission_id.to_string(),
        }
    }
}
