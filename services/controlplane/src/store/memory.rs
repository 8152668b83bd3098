//! In-memory implementation of the RBAC store.
//!
//! # Purpose
//! Implements `RbacStore` and `KeyStore` entirely in memory, for local
//! development and tests. Keys are owned by an external system, so a running
//! binary only knows the keys listed under `memory_keys` in its config file
//! (see `ControlPlaneConfig::memory_keys`); tests call `insert_key` directly.
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - The whole graph sits behind one `tokio::sync::RwLock`. A mutation takes the
//!   write lock, applies its changes to a staged copy, and swaps the copy in only
//!   if every step succeeded. An error halfway through therefore leaves the
//!   committed graph untouched, which is the in-memory equivalent of a rollback.
//! - Reads take the read lock and see only committed state.
//!
//! # Performance characteristics
//! Staging clones the graph on every mutation and cascades scan the junction
//! sets. Both are fine for dev/test sized workspaces and would not be at scale.
use super::{
    KeyRbacReplace, KeyStore, RbacStore, RoleGrant, RolePatch, StoreError, StoreResult,
    UpsertedPermission,
};
use crate::model::{Key, KeyPermission, KeyRole, Permission, Role, RolePermission};
use crate::observability::{PERMISSIONS_TOTAL, ROLES_TOTAL};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// `(workspace_id, id)`; entities are never addressed by id alone.
type Scoped = (String, String);

fn scoped(workspace_id: &str, id: &str) -> Scoped {
    (workspace_id.to_string(), id.to_string())
}

#[derive(Debug, Default, Clone)]
struct Graph {
    permissions: HashMap<Scoped, Permission>,
    roles: HashMap<Scoped, Role>,
    role_permissions: HashSet<RolePermission>,
    key_roles: HashSet<KeyRole>,
    key_permissions: HashSet<KeyPermission>,
    key_versions: HashMap<Scoped, u64>,
}

impl Graph {
    fn permission(&self, workspace_id: &str, id: &str) -> Option<&Permission> {
        self.permissions.get(&scoped(workspace_id, id))
    }

    fn role(&self, workspace_id: &str, id: &str) -> Option<&Role> {
        self.roles.get(&scoped(workspace_id, id))
    }

    fn permission_named(&self, workspace_id: &str, name: &str) -> Option<&Permission> {
        self.permissions
            .values()
            .find(|perm| perm.workspace_id == workspace_id && perm.name == name)
    }

    fn role_named(&self, workspace_id: &str, name: &str) -> Option<&Role> {
        self.roles
            .values()
            .find(|role| role.workspace_id == workspace_id && role.name == name)
    }

    fn version(&self, workspace_id: &str, key_id: &str) -> u64 {
        self.key_versions
            .get(&scoped(workspace_id, key_id))
            .copied()
            .unwrap_or(0)
    }

    fn bump_version(&mut self, workspace_id: &str, key_id: &str) -> u64 {
        let version = self
            .key_versions
            .entry(scoped(workspace_id, key_id))
            .or_insert(0);
        *version += 1;
        *version
    }

    /// Ids from `ids` that do not name an entity in the workspace.
    fn missing_roles(&self, workspace_id: &str, ids: &[String]) -> Vec<String> {
        ids.iter()
            .filter(|id| self.role(workspace_id, id).is_none())
            .cloned()
            .collect()
    }

    fn missing_permissions(&self, workspace_id: &str, ids: &[String]) -> Vec<String> {
        ids.iter()
            .filter(|id| self.permission(workspace_id, id).is_none())
            .cloned()
            .collect()
    }
}

/// In-memory RBAC store and key registry.
///
/// The key registry stands in for the key service in dev and tests; keys are
/// added with [`InMemoryStore::insert_key`] rather than through the RBAC API.
#[derive(Default)]
pub struct InMemoryStore {
    graph: Arc<RwLock<Graph>>,
    keys: Arc<RwLock<HashMap<Scoped, Key>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_key(&self, key: Key) {
        self.keys
            .write()
            .await
            .insert(scoped(&key.workspace_id, &key.id), key);
    }

    pub async fn soft_delete_key(&self, workspace_id: &str, key_id: &str) -> StoreResult<()> {
        let mut keys = self.keys.write().await;
        let key = keys
            .get_mut(&scoped(workspace_id, key_id))
            .ok_or_else(|| StoreError::NotFound("key".into()))?;
        key.deleted_at = Some(Utc::now());
        Ok(())
    }

    /// Run `apply` against a staged copy of the graph and commit it on success.
    async fn transact<T, F>(&self, apply: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Graph) -> StoreResult<T>,
    {
        let mut graph = self.graph.write().await;
        let mut staged = graph.clone();
        let out = apply(&mut staged)?;
        *graph = staged;
        metrics::gauge!(ROLES_TOTAL).set(graph.roles.len() as f64);
        metrics::gauge!(PERMISSIONS_TOTAL).set(graph.permissions.len() as f64);
        Ok(out)
    }
}

fn sorted_by_name<T>(mut items: Vec<T>, name: impl Fn(&T) -> &str) -> Vec<T> {
    items.sort_by(|a, b| name(a).cmp(name(b)));
    items
}

#[async_trait]
impl RbacStore for InMemoryStore {
    async fn list_permissions(&self, workspace_id: &str) -> StoreResult<Vec<Permission>> {
        let graph = self.graph.read().await;
        let items = graph
            .permissions
            .values()
            .filter(|perm| perm.workspace_id == workspace_id)
            .cloned()
            .collect();
        Ok(sorted_by_name(items, |perm: &Permission| &perm.name))
    }

    async fn get_permission(&self, workspace_id: &str, id: &str) -> StoreResult<Permission> {
        self.graph
            .read()
            .await
            .permission(workspace_id, id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("permission".into()))
    }

    async fn find_permissions(
        &self,
        workspace_id: &str,
        ids: &[String],
    ) -> StoreResult<Vec<Permission>> {
        let graph = self.graph.read().await;
        let unique: BTreeSet<&String> = ids.iter().collect();
        Ok(unique
            .into_iter()
            .filter_map(|id| graph.permission(workspace_id, id).cloned())
            .collect())
    }

    async fn create_permission(&self, permission: Permission) -> StoreResult<Permission> {
        self.transact(|graph| {
            if graph
                .permission_named(&permission.workspace_id, &permission.name)
                .is_some()
            {
                return Err(StoreError::Conflict("permission exists".into()));
            }
            graph.permissions.insert(
                scoped(&permission.workspace_id, &permission.id),
                permission.clone(),
            );
            Ok(permission)
        })
        .await
    }

    async fn upsert_permissions(
        &self,
        workspace_id: &str,
        names: &[String],
    ) -> StoreResult<Vec<UpsertedPermission>> {
        self.transact(|graph| {
            let mut out: Vec<UpsertedPermission> = Vec::with_capacity(names.len());
            for name in names {
                if out.iter().any(|item| &item.permission.name == name) {
                    continue;
                }
                if let Some(existing) = graph.permission_named(workspace_id, name) {
                    out.push(UpsertedPermission {
                        permission: existing.clone(),
                        created: false,
                    });
                    continue;
                }
                let permission = Permission::new(workspace_id, name, None);
                graph
                    .permissions
                    .insert(scoped(workspace_id, &permission.id), permission.clone());
                out.push(UpsertedPermission {
                    permission,
                    created: true,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn update_permission(
        &self,
        workspace_id: &str,
        id: &str,
        name: &str,
        description: Option<String>,
    ) -> StoreResult<()> {
        self.transact(|graph| {
            if graph
                .permission_named(workspace_id, name)
                .is_some_and(|other| other.id != id)
            {
                return Err(StoreError::Conflict("permission exists".into()));
            }
            let perm = graph
                .permissions
                .get_mut(&scoped(workspace_id, id))
                .ok_or_else(|| StoreError::NotFound("permission".into()))?;
            perm.name = name.to_string();
            perm.slug = name.to_string();
            perm.description = description;
            perm.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn delete_permission(&self, workspace_id: &str, id: &str) -> StoreResult<Permission> {
        self.transact(|graph| {
            if graph.permission(workspace_id, id).is_none() {
                return Err(StoreError::NotFound("permission".into()));
            }
            // Links first, then the permission itself.
            graph
                .role_permissions
                .retain(|link| !(link.workspace_id == workspace_id && link.permission_id == id));
            let affected_keys: Vec<String> = graph
                .key_permissions
                .iter()
                .filter(|link| link.workspace_id == workspace_id && link.permission_id == id)
                .map(|link| link.key_id.clone())
                .collect();
            graph
                .key_permissions
                .retain(|link| !(link.workspace_id == workspace_id && link.permission_id == id));
            for key_id in &affected_keys {
                graph.bump_version(workspace_id, key_id);
            }
            graph
                .permissions
                .remove(&scoped(workspace_id, id))
                .ok_or_else(|| StoreError::NotFound("permission".into()))
        })
        .await
    }

    async fn list_roles(&self, workspace_id: &str) -> StoreResult<Vec<Role>> {
        let graph = self.graph.read().await;
        let items = graph
            .roles
            .values()
            .filter(|role| role.workspace_id == workspace_id)
            .cloned()
            .collect();
        Ok(sorted_by_name(items, |role: &Role| &role.name))
    }

    async fn get_role(&self, workspace_id: &str, id: &str) -> StoreResult<Role> {
        self.graph
            .read()
            .await
            .role(workspace_id, id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("role".into()))
    }

    async fn find_roles(&self, workspace_id: &str, ids: &[String]) -> StoreResult<Vec<Role>> {
        let graph = self.graph.read().await;
        let unique: BTreeSet<&String> = ids.iter().collect();
        Ok(unique
            .into_iter()
            .filter_map(|id| graph.role(workspace_id, id).cloned())
            .collect())
    }

    async fn create_role(&self, role: Role, permission_ids: &[String]) -> StoreResult<Role> {
        self.transact(|graph| {
            let workspace_id = role.workspace_id.as_str();
            if graph.role_named(workspace_id, &role.name).is_some() {
                return Err(StoreError::Conflict("role exists".into()));
            }
            let missing = graph.missing_permissions(workspace_id, permission_ids);
            if !missing.is_empty() {
                return Err(StoreError::Invalid(format!(
                    "permissions not found: {}",
                    missing.join(", ")
                )));
            }
            graph
                .roles
                .insert(scoped(workspace_id, &role.id), role.clone());
            for permission_id in permission_ids {
                graph.role_permissions.insert(RolePermission::new(
                    workspace_id,
                    &role.id,
                    permission_id,
                ));
            }
            Ok(role)
        })
        .await
    }

    async fn update_role(
        &self,
        workspace_id: &str,
        id: &str,
        patch: RolePatch,
    ) -> StoreResult<()> {
        self.transact(|graph| {
            if let Some(name) = &patch.name {
                if graph
                    .role_named(workspace_id, name)
                    .is_some_and(|other| other.id != id)
                {
                    return Err(StoreError::Conflict("role exists".into()));
                }
            }
            let role = graph
                .roles
                .get_mut(&scoped(workspace_id, id))
                .ok_or_else(|| StoreError::NotFound("role".into()))?;
            if let Some(name) = patch.name {
                role.name = name;
            }
            if let Some(description) = patch.description {
                role.description = Some(description);
            }
            role.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn delete_roles(&self, workspace_id: &str, ids: &[String]) -> StoreResult<Vec<Role>> {
        self.transact(|graph| {
            let unique: BTreeSet<&String> = ids.iter().collect();
            let found: Vec<Role> = unique
                .iter()
                .filter_map(|id| graph.role(workspace_id, id).cloned())
                .collect();
            if found.len() != unique.len() {
                let missing = graph.missing_roles(workspace_id, ids);
                return Err(StoreError::NotFound(format!(
                    "roles not found: {}",
                    missing.join(", ")
                )));
            }
            let doomed: HashSet<&str> = found.iter().map(|role| role.id.as_str()).collect();

            // Children of children, then children, then the roles themselves.
            graph.role_permissions.retain(|link| {
                !(link.workspace_id == workspace_id && doomed.contains(link.role_id.as_str()))
            });
            let affected_keys: BTreeSet<String> = graph
                .key_roles
                .iter()
                .filter(|link| {
                    link.workspace_id == workspace_id && doomed.contains(link.role_id.as_str())
                })
                .map(|link| link.key_id.clone())
                .collect();
            graph.key_roles.retain(|link| {
                !(link.workspace_id == workspace_id && doomed.contains(link.role_id.as_str()))
            });
            for role in &found {
                graph.roles.remove(&scoped(workspace_id, &role.id));
            }
            for key_id in &affected_keys {
                graph.bump_version(workspace_id, key_id);
            }
            Ok(found)
        })
        .await
    }

    async fn connect_role_permission(
        &self,
        workspace_id: &str,
        role_id: &str,
        permission_id: &str,
    ) -> StoreResult<bool> {
        self.transact(|graph| {
            if graph.role(workspace_id, role_id).is_none() {
                return Err(StoreError::NotFound("role".into()));
            }
            if graph.permission(workspace_id, permission_id).is_none() {
                return Err(StoreError::NotFound("permission".into()));
            }
            Ok(graph.role_permissions.insert(RolePermission::new(
                workspace_id,
                role_id,
                permission_id,
            )))
        })
        .await
    }

    async fn disconnect_role_permission(
        &self,
        workspace_id: &str,
        role_id: &str,
        permission_id: &str,
    ) -> StoreResult<bool> {
        self.transact(|graph| {
            Ok(graph.role_permissions.remove(&RolePermission::new(
                workspace_id,
                role_id,
                permission_id,
            )))
        })
        .await
    }

    async fn role_grants(
        &self,
        workspace_id: &str,
        role_ids: &[String],
    ) -> StoreResult<Vec<RoleGrant>> {
        let graph = self.graph.read().await;
        let wanted: HashSet<&str> = role_ids.iter().map(String::as_str).collect();
        let mut grants: Vec<RoleGrant> = graph
            .role_permissions
            .iter()
            .filter(|link| {
                link.workspace_id == workspace_id && wanted.contains(link.role_id.as_str())
            })
            .filter_map(|link| {
                graph
                    .permission(workspace_id, &link.permission_id)
                    .map(|permission| RoleGrant {
                        role_id: link.role_id.clone(),
                        permission: permission.clone(),
                    })
            })
            .collect();
        grants.sort_by(|a, b| {
            (a.role_id.as_str(), a.permission.name.as_str())
                .cmp(&(b.role_id.as_str(), b.permission.name.as_str()))
        });
        Ok(grants)
    }

    async fn role_key_ids(&self, workspace_id: &str, role_id: &str) -> StoreResult<Vec<String>> {
        let graph = self.graph.read().await;
        let ids: BTreeSet<String> = graph
            .key_roles
            .iter()
            .filter(|link| link.workspace_id == workspace_id && link.role_id == role_id)
            .map(|link| link.key_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn key_roles(&self, workspace_id: &str, key_id: &str) -> StoreResult<Vec<Role>> {
        let graph = self.graph.read().await;
        let items = graph
            .key_roles
            .iter()
            .filter(|link| link.workspace_id == workspace_id && link.key_id == key_id)
            .filter_map(|link| graph.role(workspace_id, &link.role_id).cloned())
            .collect();
        Ok(sorted_by_name(items, |role: &Role| &role.name))
    }

    async fn key_permissions(
        &self,
        workspace_id: &str,
        key_id: &str,
    ) -> StoreResult<Vec<Permission>> {
        let graph = self.graph.read().await;
        let items = graph
            .key_permissions
            .iter()
            .filter(|link| link.workspace_id == workspace_id && link.key_id == key_id)
            .filter_map(|link| graph.permission(workspace_id, &link.permission_id).cloned())
            .collect();
        Ok(sorted_by_name(items, |perm: &Permission| &perm.name))
    }

    async fn connect_key_role(
        &self,
        workspace_id: &str,
        key_id: &str,
        role_id: &str,
    ) -> StoreResult<bool> {
        self.transact(|graph| {
            if graph.role(workspace_id, role_id).is_none() {
                return Err(StoreError::NotFound("role".into()));
            }
            let created = graph
                .key_roles
                .insert(KeyRole::new(workspace_id, key_id, role_id));
            if created {
                graph.bump_version(workspace_id, key_id);
            }
            Ok(created)
        })
        .await
    }

    async fn disconnect_key_role(
        &self,
        workspace_id: &str,
        key_id: &str,
        role_id: &str,
    ) -> StoreResult<bool> {
        self.transact(|graph| {
            let removed = graph
                .key_roles
                .remove(&KeyRole::new(workspace_id, key_id, role_id));
            if removed {
                graph.bump_version(workspace_id, key_id);
            }
            Ok(removed)
        })
        .await
    }

    async fn connect_key_permission(
        &self,
        workspace_id: &str,
        key_id: &str,
        permission_id: &str,
    ) -> StoreResult<bool> {
        self.transact(|graph| {
            if graph.permission(workspace_id, permission_id).is_none() {
                return Err(StoreError::NotFound("permission".into()));
            }
            let created = graph.key_permissions.insert(KeyPermission::new(
                workspace_id,
                key_id,
                permission_id,
            ));
            if created {
                graph.bump_version(workspace_id, key_id);
            }
            Ok(created)
        })
        .await
    }

    async fn disconnect_key_permission(
        &self,
        workspace_id: &str,
        key_id: &str,
        permission_id: &str,
    ) -> StoreResult<bool> {
        self.transact(|graph| {
            let removed = graph.key_permissions.remove(&KeyPermission::new(
                workspace_id,
                key_id,
                permission_id,
            ));
            if removed {
                graph.bump_version(workspace_id, key_id);
            }
            Ok(removed)
        })
        .await
    }

    async fn replace_key_rbac(
        &self,
        workspace_id: &str,
        replace: &KeyRbacReplace,
    ) -> StoreResult<u64> {
        self.transact(|graph| {
            let key_id = replace.key_id.as_str();
            if let Some(expected) = replace.expected_version {
                let current = graph.version(workspace_id, key_id);
                if current != expected {
                    return Err(StoreError::Conflict(format!(
                        "key authorization version is {current}, expected {expected}"
                    )));
                }
            }
            let missing_roles = graph.missing_roles(workspace_id, &replace.role_ids);
            if !missing_roles.is_empty() {
                return Err(StoreError::Invalid(format!(
                    "roles not found: {}",
                    missing_roles.join(", ")
                )));
            }
            let missing_perms = graph.missing_permissions(workspace_id, &replace.permission_ids);
            if !missing_perms.is_empty() {
                return Err(StoreError::Invalid(format!(
                    "permissions not found: {}",
                    missing_perms.join(", ")
                )));
            }

            graph
                .key_roles
                .retain(|link| !(link.workspace_id == workspace_id && link.key_id == key_id));
            graph
                .key_permissions
                .retain(|link| !(link.workspace_id == workspace_id && link.key_id == key_id));
            for role_id in &replace.role_ids {
                graph
                    .key_roles
                    .insert(KeyRole::new(workspace_id, key_id, role_id));
            }
            for permission_id in &replace.permission_ids {
                graph
                    .key_permissions
                    .insert(KeyPermission::new(workspace_id, key_id, permission_id));
            }
            Ok(graph.bump_version(workspace_id, key_id))
        })
        .await
    }

    async fn key_authz_version(&self, workspace_id: &str, key_id: &str) -> StoreResult<u64> {
        Ok(self.graph.read().await.version(workspace_id, key_id))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl KeyStore for InMemoryStore {
    async fn get_key(&self, workspace_id: &str, key_id: &str) -> StoreResult<Option<Key>> {
        Ok(self
            .keys
            .read()
            .await
            .get(&scoped(workspace_id, key_id))
            .cloned())
    }

    async fn find_keys(&self, workspace_id: &str, ids: &[String]) -> StoreResult<Vec<Key>> {
        let keys = self.keys.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| keys.get(&scoped(workspace_id, id)).cloned())
            .collect())
    }
}
