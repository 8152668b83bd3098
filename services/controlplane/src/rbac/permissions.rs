//! Permission lifecycle operations.
use super::validate::{record_mutation, require_name};
use super::{RbacResult, RbacService, WorkspaceContext};
use crate::audit::{AuditEvent, AuditResource};
use crate::model::Permission;

impl RbacService {
    pub async fn list_permissions(&self, ctx: &WorkspaceContext) -> RbacResult<Vec<Permission>> {
        self.store
            .list_permissions(&ctx.workspace_id)
            .await
            .map_err(|err| self.classify("list_permissions", ctx, err))
    }

    pub async fn get_permission(&self, ctx: &WorkspaceContext, id: &str) -> RbacResult<Permission> {
        self.store
            .get_permission(&ctx.workspace_id, id)
            .await
            .map_err(|err| self.classify("get_permission", ctx, err))
    }

    pub async fn create_permission(
        &self,
        ctx: &WorkspaceContext,
        name: &str,
        description: Option<String>,
    ) -> RbacResult<Permission> {
        let name = require_name("name", name)?;
        let permission = self
            .store
            .create_permission(Permission::new(&ctx.workspace_id, &name, description))
            .await
            .map_err(|err| self.classify("create_permission", ctx, err))?;
        record_mutation("create_permission");
        let entry = self.entry(
            ctx,
            AuditEvent::PermissionCreate,
            format!("Created permission {}", permission.name),
            vec![AuditResource::permission(
                &permission.id,
                Some(&permission.name),
            )],
        );
        self.emit(ctx, vec![entry]).await;
        Ok(permission)
    }

    /// Get-or-create a single permission by name.
    pub async fn upsert_permission(
        &self,
        ctx: &WorkspaceContext,
        name: &str,
    ) -> RbacResult<Permission> {
        let mut out = self.upsert_permissions(ctx, &[name.to_string()]).await?;
        out.pop().ok_or_else(|| {
            super::RbacError::Internal("failed to upsert permission".to_string())
        })
    }

    /// Get-or-create every name in one transaction.
    ///
    /// Existing permissions come back unmodified. Output follows the
    /// first-occurrence order of the (trimmed) input.
    pub async fn upsert_permissions(
        &self,
        ctx: &WorkspaceContext,
        names: &[String],
    ) -> RbacResult<Vec<Permission>> {
        let names = names
            .iter()
            .map(|name| require_name("permission name", name))
            .collect::<RbacResult<Vec<_>>>()?;
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let upserted = self
            .store
            .upsert_permissions(&ctx.workspace_id, &names)
            .await
            .map_err(|err| self.classify("upsert_permissions", ctx, err))?;

        let entries: Vec<_> = upserted
            .iter()
            .filter(|item| item.created)
            .map(|item| {
                self.entry(
                    ctx,
                    AuditEvent::PermissionCreate,
                    format!("Created permission {}", item.permission.name),
                    vec![AuditResource::permission(
                        &item.permission.id,
                        Some(&item.permission.name),
                    )],
                )
            })
            .collect();
        if !entries.is_empty() {
            record_mutation("upsert_permissions");
        }
        self.emit(ctx, entries).await;
        Ok(upserted.into_iter().map(|item| item.permission).collect())
    }

    /// Full update: `description: None` clears the description.
    pub async fn update_permission(
        &self,
        ctx: &WorkspaceContext,
        id: &str,
        name: &str,
        description: Option<String>,
    ) -> RbacResult<()> {
        let name = require_name("name", name)?;
        self.store
            .update_permission(&ctx.workspace_id, id, &name, description)
            .await
            .map_err(|err| self.classify("update_permission", ctx, err))?;
        record_mutation("update_permission");
        let entry = self.entry(
            ctx,
            AuditEvent::PermissionUpdate,
            format!("Updated permission {id}"),
            vec![AuditResource::permission(id, Some(&name))],
        );
        self.emit(ctx, vec![entry]).await;
        Ok(())
    }

    /// Delete a permission together with every role and key link to it.
    pub async fn delete_permission(&self, ctx: &WorkspaceContext, id: &str) -> RbacResult<()> {
        let deleted = self
            .store
            .delete_permission(&ctx.workspace_id, id)
            .await
            .map_err(|err| self.classify("delete_permission", ctx, err))?;
        record_mutation("delete_permission");
        let entry = self.entry(
            ctx,
            AuditEvent::PermissionDelete,
            format!("Deleted permission {}", deleted.name),
            vec![AuditResource::permission(&deleted.id, Some(&deleted.name))],
        );
        self.emit(ctx, vec![entry]).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::AuditEvent;
    use crate::rbac::RbacError;
    use crate::rbac::test_support::{ctx, harness};

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let h = harness().await;
        let ctx = ctx("ws_1");
        let first = h
            .service
            .upsert_permission(&ctx, "api.*.read_key")
            .await
            .unwrap();
        let second = h
            .service
            .upsert_permission(&ctx, " api.*.read_key ")
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.slug, "api.*.read_key");
        assert!(first.description.is_none());
        assert_eq!(h.audit.events(), vec![AuditEvent::PermissionCreate]);
    }

    #[tokio::test]
    async fn upsert_many_preserves_order_and_rejects_blank_names() {
        let h = harness().await;
        let ctx = ctx("ws_1");
        h.service
            .create_permission(&ctx, "b.*.two", None)
            .await
            .unwrap();
        let out = h
            .service
            .upsert_permissions(
                &ctx,
                &[
                    "c.*.three".to_string(),
                    "b.*.two".to_string(),
                    "c.*.three".to_string(),
                    "a.*.one".to_string(),
                ],
            )
            .await
            .unwrap();
        let names: Vec<_> = out.iter().map(|perm| perm.name.as_str()).collect();
        assert_eq!(names, vec!["c.*.three", "b.*.two", "a.*.one"]);
        assert_eq!(h.audit.events().len(), 3);

        let err = h
            .service
            .upsert_permissions(&ctx, &["ok.*.name".to_string(), "  ".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::BadRequest(_)));
        assert_eq!(h.service.list_permissions(&ctx).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn create_update_conflicts_and_not_found() {
        let h = harness().await;
        let ctx = ctx("ws_1");
        let read = h
            .service
            .create_permission(&ctx, "api.*.read_key", Some("read".to_string()))
            .await
            .unwrap();
        h.service
            .create_permission(&ctx, "api.*.create_key", None)
            .await
            .unwrap();

        let err = h
            .service
            .create_permission(&ctx, "api.*.read_key", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::Conflict(_)));

        let err = h
            .service
            .update_permission(&ctx, &read.id, "api.*.create_key", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::Conflict(_)));

        h.service
            .update_permission(&ctx, &read.id, "api.*.read_keys", None)
            .await
            .unwrap();
        let updated = h.service.get_permission(&ctx, &read.id).await.unwrap();
        assert_eq!(updated.slug, "api.*.read_keys");
        assert!(updated.description.is_none());

        let err = h
            .service
            .update_permission(&ctx, "perm_missing", "x.*.y", None)
            .await
            .unwrap_err();
        assert_eq!(err, RbacError::NotFound("permission not found".into()));
    }

    #[tokio::test]
    async fn permissions_are_invisible_across_workspaces() {
        let h = harness().await;
        let perm = h
            .service
            .create_permission(&ctx("ws_1"), "api.*.read_key", None)
            .await
            .unwrap();
        let other = ctx("ws_2");
        assert!(h.service.list_permissions(&other).await.unwrap().is_empty());
        assert!(matches!(
            h.service.get_permission(&other, &perm.id).await,
            Err(RbacError::NotFound(_))
        ));
        assert!(matches!(
            h.service.delete_permission(&other, &perm.id).await,
            Err(RbacError::NotFound(_))
        ));
        h.service
            .create_permission(&other, "api.*.read_key", None)
            .await
            .unwrap();
    }
}
