//! RBAC data model module.
//!
//! # Purpose
//! Re-exports the workspace-scoped permission, role, key, and junction records
//! shared by the store, service, and HTTP layers.
mod key;
mod link;
mod permission;
mod role;

pub use key::Key;
pub use link::{KeyPermission, KeyRole, RolePermission};
pub use permission::Permission;
pub use role::Role;

/// Generate a server-side identifier for a new entity.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
