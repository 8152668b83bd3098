//! Permission model definitions.
//!
//! # Purpose
//! Defines the workspace-scoped permission record. `slug` is the string that
//! runtime enforcement checks; it always tracks `name`.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    /// Build a new permission with a fresh id; the slug mirrors the name.
    pub fn new(workspace_id: &str, name: &str, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: super::new_id(),
            workspace_id: workspace_id.to_string(),
            name: name.to_string(),
            slug: name.to_string(),
            description,
            created_at: now,
            updated_at: now,
        }
    }
}
