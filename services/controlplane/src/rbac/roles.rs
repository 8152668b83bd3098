//! Role lifecycle and role-permission links.
use super::validate::{dedup_ids, record_mutation, require_all_found, require_name};
use super::{RbacError, RbacResult, RbacService, WorkspaceContext};
use crate::audit::{AuditEvent, AuditResource};
use crate::model::{Permission, Role};
use crate::store::RolePatch;

#[derive(Debug, Clone, Default)]
pub struct CreateRole {
    pub name: String,
    pub description: Option<String>,
    pub permission_ids: Vec<String>,
}

impl RbacService {
    pub async fn list_roles(&self, ctx: &WorkspaceContext) -> RbacResult<Vec<Role>> {
        self.store
            .list_roles(&ctx.workspace_id)
            .await
            .map_err(|err| self.classify("list_roles", ctx, err))
    }

    pub async fn get_role(&self, ctx: &WorkspaceContext, id: &str) -> RbacResult<Role> {
        self.store
            .get_role(&ctx.workspace_id, id)
            .await
            .map_err(|err| self.classify("get_role", ctx, err))
    }

    /// Resolve `ids` (already de-duplicated) or fail naming the missing ones.
    pub(crate) async fn require_permissions(
        &self,
        op: &'static str,
        ctx: &WorkspaceContext,
        ids: &[String],
    ) -> RbacResult<Vec<Permission>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let found = self
            .store
            .find_permissions(&ctx.workspace_id, ids)
            .await
            .map_err(|err| self.classify(op, ctx, err))?;
        if found.len() != ids.len() {
            require_all_found("permissions", ids, found.iter().map(|p| p.id.as_str()))?;
        }
        Ok(found)
    }

    pub(crate) async fn require_roles(
        &self,
        op: &'static str,
        ctx: &WorkspaceContext,
        ids: &[String],
    ) -> RbacResult<Vec<Role>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let found = self
            .store
            .find_roles(&ctx.workspace_id, ids)
            .await
            .map_err(|err| self.classify(op, ctx, err))?;
        if found.len() != ids.len() {
            require_all_found("roles", ids, found.iter().map(|r| r.id.as_str()))?;
        }
        Ok(found)
    }

    /// Create a role and attach `permission_ids` to it.
    ///
    /// Every permission id must resolve in the workspace before anything is
    /// written.
    pub async fn create_role(&self, ctx: &WorkspaceContext, input: CreateRole) -> RbacResult<Role> {
        let name = require_name("name", &input.name)?;
        let permission_ids = dedup_ids(&input.permission_ids);
        let permissions = self
            .require_permissions("create_role", ctx, &permission_ids)
            .await?;

        let role = self
            .store
            .create_role(
                Role::new(&ctx.workspace_id, &name, input.description),
                &permission_ids,
            )
            .await
            .map_err(|err| self.classify("create_role", ctx, err))?;
        record_mutation("create_role");

        let mut entries = Vec::with_capacity(permissions.len() + 1);
        entries.push(self.entry(
            ctx,
            AuditEvent::RoleCreate,
            format!("Created role {}", role.name),
            vec![AuditResource::role(&role.id, Some(&role.name))],
        ));
        for permission in &permissions {
            entries.push(self.entry(
                ctx,
                AuditEvent::ConnectRoleAndPermission,
                format!(
                    "Connected role {} and permission {}",
                    role.name, permission.name
                ),
                vec![
                    AuditResource::role(&role.id, Some(&role.name)),
                    AuditResource::permission(&permission.id, Some(&permission.name)),
                ],
            ));
        }
        self.emit(ctx, entries).await;
        Ok(role)
    }

    /// Patch a role; fields left `None` are untouched.
    pub async fn update_role(
        &self,
        ctx: &WorkspaceContext,
        id: &str,
        patch: RolePatch,
    ) -> RbacResult<()> {
        let patch = RolePatch {
            name: patch
                .name
                .as_deref()
                .map(|name| require_name("name", name))
                .transpose()?,
            description: patch.description,
        };
        let renamed = patch.name.clone();
        self.store
            .update_role(&ctx.workspace_id, id, patch)
            .await
            .map_err(|err| self.classify("update_role", ctx, err))?;
        record_mutation("update_role");
        let entry = self.entry(
            ctx,
            AuditEvent::RoleUpdate,
            format!("Updated role {id}"),
            vec![AuditResource::role(id, renamed.as_deref())],
        );
        self.emit(ctx, vec![entry]).await;
        Ok(())
    }

    /// Delete one role through the same cascade as the bulk path.
    pub async fn delete_role(&self, ctx: &WorkspaceContext, id: &str) -> RbacResult<()> {
        self.delete_roles_with_relations(ctx, &[id.to_string()])
            .await
            .map(|_| ())
    }

    /// All-or-nothing delete of roles and their links; returns the number deleted.
    pub async fn delete_roles_with_relations(
        &self,
        ctx: &WorkspaceContext,
        role_ids: &[String],
    ) -> RbacResult<usize> {
        let role_ids = dedup_ids(role_ids);
        if role_ids.is_empty() {
            return Err(RbacError::BadRequest(
                "at least one role id is required".to_string(),
            ));
        }
        let deleted = self
            .store
            .delete_roles(&ctx.workspace_id, &role_ids)
            .await
            .map_err(|err| self.classify("delete_roles", ctx, err))?;
        record_mutation("delete_roles");

        let names: Vec<&str> = deleted.iter().map(|role| role.name.as_str()).collect();
        let entry = self.entry(
            ctx,
            AuditEvent::RoleDelete,
            format!("Deleted roles {}", names.join(", ")),
            deleted
                .iter()
                .map(|role| AuditResource::role(&role.id, Some(&role.name)))
                .collect(),
        );
        self.emit(ctx, vec![entry]).await;
        Ok(deleted.len())
    }

    /// Idempotent: reconnecting an existing pair succeeds without a new row.
    pub async fn connect_permission_to_role(
        &self,
        ctx: &WorkspaceContext,
        role_id: &str,
        permission_id: &str,
    ) -> RbacResult<()> {
        let role = self.get_role(ctx, role_id).await?;
        let permission = self.get_permission(ctx, permission_id).await?;
        let created = self
            .store
            .connect_role_permission(&ctx.workspace_id, role_id, permission_id)
            .await
            .map_err(|err| self.classify("connect_role_permission", ctx, err))?;
        if created {
            record_mutation("connect_role_permission");
            let entry = self.entry(
                ctx,
                AuditEvent::ConnectRoleAndPermission,
                format!(
                    "Connected role {} and permission {}",
                    role.name, permission.name
                ),
                vec![
                    AuditResource::role(&role.id, Some(&role.name)),
                    AuditResource::permission(&permission.id, Some(&permission.name)),
                ],
            );
            self.emit(ctx, vec![entry]).await;
        }
        Ok(())
    }

    /// Best-effort: a missing link is not an error.
    pub async fn disconnect_permission_from_role(
        &self,
        ctx: &WorkspaceContext,
        role_id: &str,
        permission_id: &str,
    ) -> RbacResult<()> {
        let removed = self
            .store
            .disconnect_role_permission(&ctx.workspace_id, role_id, permission_id)
            .await
            .map_err(|err| self.classify("disconnect_role_permission", ctx, err))?;
        if removed {
            record_mutation("disconnect_role_permission");
            let entry = self.entry(
                ctx,
                AuditEvent::DisconnectRoleAndPermission,
                format!("Disconnected role {role_id} and permission {permission_id}"),
                vec![
                    AuditResource::role(role_id, None),
                    AuditResource::permission(permission_id, None),
                ],
            );
            self.emit(ctx, vec![entry]).await;
        }
        Ok(())
    }
}
