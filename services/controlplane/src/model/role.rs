//! Role model definitions.
//!
//! # Purpose
//! Defines the workspace-scoped role record. Role names are unique per workspace.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn new(workspace_id: &str, name: &str, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: super::new_id(),
            workspace_id: workspace_id.to_string(),
            name: name.to_string(),
            description,
            created_at: now,
            updated_at: now,
        }
    }
}
