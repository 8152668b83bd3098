//! API key records as seen by the RBAC control plane.
//!
//! # Purpose
//! Keys are owned by the key service. This crate only reads them to check
//! existence, workspace ownership, and soft-delete state.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    pub id: String,
    pub workspace_id: String,
    pub name: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Key {
    pub fn new(workspace_id: &str, id: &str, name: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            workspace_id: workspace_id.to_string(),
            name,
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    /// A soft-deleted key is treated as absent everywhere.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}
