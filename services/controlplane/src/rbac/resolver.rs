//! Effective-permission views.
//!
//! # Purpose
//! Read-only resolution of what a key, a role, or an arbitrary set of roles
//! and permissions grants. Nothing here mutates state.
//!
//! # Provenance rules
//! - A permission granted both directly and through a role is reported once,
//!   tagged `direct`.
//! - A permission reached through several roles is tagged with the role whose
//!   name sorts first.
use super::categorize::{PermissionSummary, categorize};
use super::validate::{dedup_ids, require_all_found};
use super::{RbacResult, RbacService, WorkspaceContext};
use crate::model::{Permission, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PermissionSource {
    Direct,
    Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EffectivePermission {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub source: PermissionSource,
    /// Set when `source` is `role`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,
}

impl EffectivePermission {
    fn from_permission(
        permission: &Permission,
        source: PermissionSource,
        role_id: Option<&str>,
    ) -> Self {
        Self {
            id: permission.id.clone(),
            name: permission.name.clone(),
            slug: permission.slug.clone(),
            description: permission.description.clone(),
            source,
            role_id: role_id.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRole {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

impl From<&Role> for ResolvedRole {
    fn from(role: &Role) -> Self {
        Self {
            id: role.id.clone(),
            name: role.name.clone(),
            description: role.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedKey {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyRbacView {
    pub key_id: String,
    pub name: Option<String>,
    pub last_updated: DateTime<Utc>,
    /// Current authz version, usable as `expectedVersion` on the next replace.
    pub version: u64,
    pub roles: Vec<ResolvedRole>,
    pub permissions: Vec<EffectivePermission>,
    pub summary: PermissionSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleRbacView {
    pub role_id: String,
    pub name: String,
    pub description: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub keys: Vec<ResolvedKey>,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SlugBreakdown {
    /// Distinct role-derived slugs, counted before merging with direct ones.
    pub from_roles: usize,
    pub from_direct_permissions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SlugResolution {
    pub slugs: Vec<String>,
    pub total_count: usize,
    pub breakdown: SlugBreakdown,
}

impl RbacService {
    /// Effective permissions of a live key, with provenance.
    pub async fn resolve_by_key(
        &self,
        ctx: &WorkspaceContext,
        key_id: &str,
    ) -> RbacResult<KeyRbacView> {
        const OP: &str = "resolve_by_key";
        let key = self.require_active_key(OP, ctx, key_id).await?;
        let ws = ctx.workspace_id.as_str();
        let roles = self
            .store
            .key_roles(ws, key_id)
            .await
            .map_err(|err| self.classify(OP, ctx, err))?;
        let direct = self
            .store
            .key_permissions(ws, key_id)
            .await
            .map_err(|err| self.classify(OP, ctx, err))?;
        let role_ids: Vec<String> = roles.iter().map(|role| role.id.clone()).collect();
        let grants = self
            .store
            .role_grants(ws, &role_ids)
            .await
            .map_err(|err| self.classify(OP, ctx, err))?;
        let version = self
            .store
            .key_authz_version(ws, key_id)
            .await
            .map_err(|err| self.classify(OP, ctx, err))?;

        let mut by_id: HashMap<String, EffectivePermission> = HashMap::new();
        for permission in &direct {
            by_id.insert(
                permission.id.clone(),
                EffectivePermission::from_permission(permission, PermissionSource::Direct, None),
            );
        }
        // `roles` arrives sorted by name, so the first role to claim a permission wins.
        for role in &roles {
            for grant in grants.iter().filter(|grant| grant.role_id == role.id) {
                by_id.entry(grant.permission.id.clone()).or_insert_with(|| {
                    EffectivePermission::from_permission(
                        &grant.permission,
                        PermissionSource::Role,
                        Some(&role.id),
                    )
                });
            }
        }
        let mut permissions: Vec<EffectivePermission> = by_id.into_values().collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let names: Vec<&str> = permissions.iter().map(|perm| perm.name.as_str()).collect();
        let summary = categorize(&names);
        Ok(KeyRbacView {
            key_id: key.id,
            name: key.name,
            last_updated: key.updated_at,
            version,
            roles: roles.iter().map(ResolvedRole::from).collect(),
            permissions,
            summary,
        })
    }

    /// Live keys holding a role and the permissions attached to it.
    pub async fn resolve_by_role(
        &self,
        ctx: &WorkspaceContext,
        role_id: &str,
    ) -> RbacResult<RoleRbacView> {
        const OP: &str = "resolve_by_role";
        let role = self.get_role(ctx, role_id).await?;
        let ws = ctx.workspace_id.as_str();
        let key_ids = self
            .store
            .role_key_ids(ws, role_id)
            .await
            .map_err(|err| self.classify(OP, ctx, err))?;
        let key_ids = dedup_ids(&key_ids);
        let mut keys: Vec<ResolvedKey> = self
            .keys
            .find_keys(ws, &key_ids)
            .await
            .map_err(|err| self.classify(OP, ctx, err))?
            .into_iter()
            .filter(|key| key.is_active())
            .map(|key| ResolvedKey {
                id: key.id,
                name: key.name,
            })
            .collect();
        keys.sort_by(|a, b| a.id.cmp(&b.id));

        let grants = self
            .store
            .role_grants(ws, std::slice::from_ref(&role.id))
            .await
            .map_err(|err| self.classify(OP, ctx, err))?;
        let permissions: BTreeMap<(String, String), Permission> = grants
            .into_iter()
            .map(|grant| {
                (
                    (grant.permission.name.clone(), grant.permission.id.clone()),
                    grant.permission,
                )
            })
            .collect();

        Ok(RoleRbacView {
            role_id: role.id,
            name: role.name,
            description: role.description,
            last_updated: role.updated_at,
            keys,
            permissions: permissions.into_values().collect(),
        })
    }

    /// Flat, sorted, de-duplicated slugs granted by a role set plus a permission set.
    pub async fn resolve_slugs(
        &self,
        ctx: &WorkspaceContext,
        role_ids: &[String],
        permission_ids: &[String],
    ) -> RbacResult<SlugResolution> {
        const OP: &str = "resolve_slugs";
        let role_ids = dedup_ids(role_ids);
        let permission_ids = dedup_ids(permission_ids);
        if role_ids.is_empty() && permission_ids.is_empty() {
            return Ok(SlugResolution::default());
        }

        let grants = self
            .store
            .role_grants(&ctx.workspace_id, &role_ids)
            .await
            .map_err(|err| self.classify(OP, ctx, err))?;
        let granting: BTreeSet<&str> = grants.iter().map(|grant| grant.role_id.as_str()).collect();
        if role_ids.iter().any(|id| !granting.contains(id.as_str())) {
            // A role missing from the grants is either empty or unknown.
            self.require_roles(OP, ctx, &role_ids).await?;
        }
        let direct = self
            .store
            .find_permissions(&ctx.workspace_id, &permission_ids)
            .await
            .map_err(|err| self.classify(OP, ctx, err))?;
        if direct.len() != permission_ids.len() {
            require_all_found(
                "permissions",
                &permission_ids,
                direct.iter().map(|perm| perm.id.as_str()),
            )?;
        }

        let from_roles: BTreeSet<&str> = grants
            .iter()
            .map(|grant| grant.permission.slug.as_str())
            .collect();
        let from_direct: BTreeSet<&str> = direct.iter().map(|perm| perm.slug.as_str()).collect();
        let breakdown = SlugBreakdown {
            from_roles: from_roles.len(),
            from_direct_permissions: from_direct.len(),
        };
        let slugs: Vec<String> = from_roles
            .union(&from_direct)
            .map(|slug| slug.to_string())
            .collect();
        Ok(SlugResolution {
            total_count: slugs.len(),
            slugs,
            breakdown,
        })
    }
}
