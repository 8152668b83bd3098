//! Key-role and key-permission links, including the atomic full replace.
//!
//! # Key invariants
//! - The key must exist in the workspace and not be soft-deleted.
//! - A full replace treats its id lists as the complete desired state. All
//!   four steps (clear roles, clear permissions, insert roles, insert
//!   permissions) commit together or not at all.
//! - Every change to a key's links bumps its authz version. Callers that
//!   pass `expected_version` get `Conflict` instead of overwriting a change
//!   they have not seen.
use super::validate::{dedup_ids, record_mutation};
use super::{RbacResult, RbacService, WorkspaceContext};
use crate::audit::{AuditEvent, AuditResource};
use crate::store::KeyRbacReplace;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use utoipa::ToSchema;

/// Desired authorization state for one key.
#[derive(Debug, Clone, Default)]
pub struct ReplaceKeyRbac {
    pub role_ids: Vec<String>,
    pub permission_ids: Vec<String>,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyRbacReplaced {
    pub key_id: String,
    pub roles_assigned: usize,
    pub direct_permissions_assigned: usize,
    pub total_effective_permissions: usize,
    pub version: u64,
}

impl RbacService {
    pub async fn connect_role_to_key(
        &self,
        ctx: &WorkspaceContext,
        key_id: &str,
        role_id: &str,
    ) -> RbacResult<()> {
        self.require_active_key("connect_key_role", ctx, key_id)
            .await?;
        let role = self.get_role(ctx, role_id).await?;
        let created = self
            .store
            .connect_key_role(&ctx.workspace_id, key_id, role_id)
            .await
            .map_err(|err| self.classify("connect_key_role", ctx, err))?;
        if created {
            record_mutation("connect_key_role");
            let entry = self.entry(
                ctx,
                AuditEvent::ConnectRoleAndKey,
                format!("Connected role {} and key {key_id}", role.name),
                vec![
                    AuditResource::key(key_id),
                    AuditResource::role(&role.id, Some(&role.name)),
                ],
            );
            self.emit(ctx, vec![entry]).await;
        }
        Ok(())
    }

    pub async fn disconnect_role_from_key(
        &self,
        ctx: &WorkspaceContext,
        key_id: &str,
        role_id: &str,
    ) -> RbacResult<()> {
        self.require_active_key("disconnect_key_role", ctx, key_id)
            .await?;
        let removed = self
            .store
            .disconnect_key_role(&ctx.workspace_id, key_id, role_id)
            .await
            .map_err(|err| self.classify("disconnect_key_role", ctx, err))?;
        if removed {
            record_mutation("disconnect_key_role");
            let entry = self.entry(
                ctx,
                AuditEvent::DisconnectRoleAndKey,
                format!("Disconnected role {role_id} and key {key_id}"),
                vec![AuditResource::key(key_id), AuditResource::role(role_id, None)],
            );
            self.emit(ctx, vec![entry]).await;
        }
        Ok(())
    }

    pub async fn connect_permission_to_key(
        &self,
        ctx: &WorkspaceContext,
        key_id: &str,
        permission_id: &str,
    ) -> RbacResult<()> {
        self.require_active_key("connect_key_permission", ctx, key_id)
            .await?;
        let permission = self.get_permission(ctx, permission_id).await?;
        let created = self
            .store
            .connect_key_permission(&ctx.workspace_id, key_id, permission_id)
            .await
            .map_err(|err| self.classify("connect_key_permission", ctx, err))?;
        if created {
            record_mutation("connect_key_permission");
            let entry = self.entry(
                ctx,
                AuditEvent::ConnectPermissionAndKey,
                format!("Connected permission {} and key {key_id}", permission.name),
                vec![
                    AuditResource::key(key_id),
                    AuditResource::permission(&permission.id, Some(&permission.name)),
                ],
            );
            self.emit(ctx, vec![entry]).await;
        }
        Ok(())
    }

    pub async fn disconnect_permission_from_key(
        &self,
        ctx: &WorkspaceContext,
        key_id: &str,
        permission_id: &str,
    ) -> RbacResult<()> {
        self.require_active_key("disconnect_key_permission", ctx, key_id)
            .await?;
        let removed = self
            .store
            .disconnect_key_permission(&ctx.workspace_id, key_id, permission_id)
            .await
            .map_err(|err| self.classify("disconnect_key_permission", ctx, err))?;
        if removed {
            record_mutation("disconnect_key_permission");
            let entry = self.entry(
                ctx,
                AuditEvent::DisconnectPermissionAndKey,
                format!("Disconnected permission {permission_id} and key {key_id}"),
                vec![
                    AuditResource::key(key_id),
                    AuditResource::permission(permission_id, None),
                ],
            );
            self.emit(ctx, vec![entry]).await;
        }
        Ok(())
    }

    /// Atomically set a key's roles and direct permissions to exactly `input`.
    pub async fn replace_key_rbac(
        &self,
        ctx: &WorkspaceContext,
        key_id: &str,
        input: ReplaceKeyRbac,
    ) -> RbacResult<KeyRbacReplaced> {
        self.require_active_key("replace_key_rbac", ctx, key_id)
            .await?;
        let role_ids = dedup_ids(&input.role_ids);
        let permission_ids = dedup_ids(&input.permission_ids);
        let roles = self
            .require_roles("replace_key_rbac", ctx, &role_ids)
            .await?;
        let permissions = self
            .require_permissions("replace_key_rbac", ctx, &permission_ids)
            .await?;

        let version = self
            .store
            .replace_key_rbac(
                &ctx.workspace_id,
                &KeyRbacReplace {
                    key_id: key_id.to_string(),
                    role_ids: role_ids.clone(),
                    permission_ids: permission_ids.clone(),
                    expected_version: input.expected_version,
                },
            )
            .await
            .map_err(|err| self.classify("replace_key_rbac", ctx, err))?;
        record_mutation("replace_key_rbac");

        let grants = self
            .store
            .role_grants(&ctx.workspace_id, &role_ids)
            .await
            .map_err(|err| self.classify("replace_key_rbac", ctx, err))?;
        let effective: HashSet<&str> = permission_ids
            .iter()
            .map(String::as_str)
            .chain(grants.iter().map(|grant| grant.permission.id.as_str()))
            .collect();

        let outcome = KeyRbacReplaced {
            key_id: key_id.to_string(),
            roles_assigned: role_ids.len(),
            direct_permissions_assigned: permission_ids.len(),
            total_effective_permissions: effective.len(),
            version,
        };

        let mut resources = vec![AuditResource::key(key_id)];
        resources.extend(
            roles
                .iter()
                .map(|role| AuditResource::role(&role.id, Some(&role.name))),
        );
        resources.extend(
            permissions
                .iter()
                .map(|perm| AuditResource::permission(&perm.id, Some(&perm.name))),
        );
        let entry = self.entry(
            ctx,
            AuditEvent::ReplaceKeyRbac,
            format!(
                "Replaced authorization of key {key_id}: {} roles, {} direct permissions, {} effective permissions",
                outcome.roles_assigned,
                outcome.direct_permissions_assigned,
                outcome.total_effective_permissions
            ),
            resources,
        );
        self.emit(ctx, vec![entry]).await;
        tracing::info!(
            workspace_id = %ctx.workspace_id,
            key_id,
            version,
            "replaced key authorization"
        );
        Ok(outcome)
    }
}
