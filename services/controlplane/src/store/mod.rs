//! RBAC persistence traits and shared store types.
//!
//! # Purpose
//! `RbacStore` is the transactional surface over the key/role/permission graph.
//! Each mutating method is one logical transaction: it either applies fully or
//! leaves no trace. `KeyStore` is the read-only view onto the key service that
//! owns key existence and soft-delete state.
//!
//! # Key invariants
//! - Every method takes the workspace id and filters by it; rows from another
//!   workspace are indistinguishable from missing rows.
//! - Backends never rely on foreign keys or `ON DELETE CASCADE`. Deletes
//!   remove junction rows before their endpoints inside the same transaction.
use crate::model::{Key, Permission, Role};
use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    /// Referenced ids that do not resolve inside the workspace.
    #[error("invalid reference: {0}")]
    Invalid(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unexpected(err.into())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a get-or-create on a permission name.
#[derive(Debug, Clone)]
pub struct UpsertedPermission {
    pub permission: Permission,
    pub created: bool,
}

/// Patch applied to a role; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct RolePatch {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Complete desired authorization state for one key.
///
/// Id lists are expected to be de-duplicated by the caller.
#[derive(Debug, Clone)]
pub struct KeyRbacReplace {
    pub key_id: String,
    pub role_ids: Vec<String>,
    pub permission_ids: Vec<String>,
    /// When set, the write only applies if the key's current authz version matches.
    pub expected_version: Option<u64>,
}

/// A permission reached through a role, tagged with that role's id.
#[derive(Debug, Clone)]
pub struct RoleGrant {
    pub role_id: String,
    pub permission: Permission,
}

#[async_trait]
pub trait RbacStore: Send + Sync {
    async fn list_permissions(&self, workspace_id: &str) -> StoreResult<Vec<Permission>>;
    async fn get_permission(&self, workspace_id: &str, id: &str) -> StoreResult<Permission>;
    /// Return the subset of `ids` that resolve in the workspace.
    async fn find_permissions(
        &self,
        workspace_id: &str,
        ids: &[String],
    ) -> StoreResult<Vec<Permission>>;
    async fn create_permission(&self, permission: Permission) -> StoreResult<Permission>;
    /// Get-or-create each name in one transaction, preserving input order.
    async fn upsert_permissions(
        &self,
        workspace_id: &str,
        names: &[String],
    ) -> StoreResult<Vec<UpsertedPermission>>;
    async fn update_permission(
        &self,
        workspace_id: &str,
        id: &str,
        name: &str,
        description: Option<String>,
    ) -> StoreResult<()>;
    /// Delete a permission and every role/key link pointing at it.
    async fn delete_permission(&self, workspace_id: &str, id: &str) -> StoreResult<Permission>;

    async fn list_roles(&self, workspace_id: &str) -> StoreResult<Vec<Role>>;
    async fn get_role(&self, workspace_id: &str, id: &str) -> StoreResult<Role>;
    async fn find_roles(&self, workspace_id: &str, ids: &[String]) -> StoreResult<Vec<Role>>;
    /// Insert a role and link it to `permission_ids` in one transaction.
    async fn create_role(&self, role: Role, permission_ids: &[String]) -> StoreResult<Role>;
    async fn update_role(&self, workspace_id: &str, id: &str, patch: RolePatch)
    -> StoreResult<()>;
    /// All-or-nothing delete of roles plus their role-permission and key-role links.
    ///
    /// Fails with `NotFound` naming the missing ids if any role does not exist.
    async fn delete_roles(&self, workspace_id: &str, ids: &[String]) -> StoreResult<Vec<Role>>;
    /// Returns `true` when a new link was created.
    async fn connect_role_permission(
        &self,
        workspace_id: &str,
        role_id: &str,
        permission_id: &str,
    ) -> StoreResult<bool>;
    /// Returns `true` when a link was removed.
    async fn disconnect_role_permission(
        &self,
        workspace_id: &str,
        role_id: &str,
        permission_id: &str,
    ) -> StoreResult<bool>;
    async fn role_grants(&self, workspace_id: &str, role_ids: &[String])
    -> StoreResult<Vec<RoleGrant>>;
    async fn role_key_ids(&self, workspace_id: &str, role_id: &str) -> StoreResult<Vec<String>>;

    async fn key_roles(&self, workspace_id: &str, key_id: &str) -> StoreResult<Vec<Role>>;
    async fn key_permissions(&self, workspace_id: &str, key_id: &str)
    -> StoreResult<Vec<Permission>>;
    async fn connect_key_role(
        &self,
        workspace_id: &str,
        key_id: &str,
        role_id: &str,
    ) -> StoreResult<bool>;
    async fn disconnect_key_role(
        &self,
        workspace_id: &str,
        key_id: &str,
        role_id: &str,
    ) -> StoreResult<bool>;
    async fn connect_key_permission(
        &self,
        workspace_id: &str,
        key_id: &str,
        permission_id: &str,
    ) -> StoreResult<bool>;
    async fn disconnect_key_permission(
        &self,
        workspace_id: &str,
        key_id: &str,
        permission_id: &str,
    ) -> StoreResult<bool>;
    /// Replace every role and direct permission link of a key; returns the new authz version.
    async fn replace_key_rbac(&self, workspace_id: &str, replace: &KeyRbacReplace)
    -> StoreResult<u64>;
    async fn key_authz_version(&self, workspace_id: &str, key_id: &str) -> StoreResult<u64>;

    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}

/// Read-only access to the key service's records.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Returns the key even when soft-deleted; callers decide how to treat `deleted_at`.
    async fn get_key(&self, workspace_id: &str, key_id: &str) -> StoreResult<Option<Key>>;
    async fn find_keys(&self, workspace_id: &str, ids: &[String]) -> StoreResult<Vec<Key>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlx_errors_become_unexpected() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::Unexpected(_)));
    }

    #[test]
    fn display_includes_category() {
        assert_eq!(
            StoreError::NotFound("role".into()).to_string(),
            "not found: role"
        );
        assert_eq!(
            StoreError::Invalid("permission ids".into()).to_string(),
            "invalid reference: permission ids"
        );
    }
}
