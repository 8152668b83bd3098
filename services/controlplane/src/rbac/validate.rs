//! Shared validation, error classification, and audit emission.
use super::{RbacError, RbacResult, RbacService, WorkspaceContext};
use crate::audit::{AuditEntry, AuditEvent, AuditResource};
use crate::model::Key;
use crate::observability::{RBAC_ERRORS_TOTAL, RBAC_MUTATIONS_TOTAL};
use crate::store::StoreError;
use std::collections::HashSet;

/// Collapse duplicate ids, keeping first-occurrence order.
pub(crate) fn dedup_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Trimmed entity name, or `BadRequest` when nothing is left.
pub(crate) fn require_name(field: &str, value: &str) -> RbacResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RbacError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

/// `BadRequest` naming every requested id that did not resolve.
pub(crate) fn require_all_found<'a>(
    what: &str,
    requested: &[String],
    found: impl IntoIterator<Item = &'a str>,
) -> RbacResult<()> {
    let found: HashSet<&str> = found.into_iter().collect();
    let missing: Vec<&str> = requested
        .iter()
        .map(String::as_str)
        .filter(|id| !found.contains(id))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RbacError::BadRequest(format!(
            "{what} not found: {}",
            missing.join(", ")
        )))
    }
}

pub(crate) fn record_mutation(op: &'static str) {
    metrics::counter!(RBAC_MUTATIONS_TOTAL, "op" => op).increment(1);
}

impl RbacService {
    /// Translate a store failure for `op`, logging anything unclassified.
    pub(crate) fn classify(&self, op: &'static str, ctx: &WorkspaceContext, err: StoreError) -> RbacError {
        let mapped = match err {
            StoreError::NotFound(what) if what.contains("not found") => RbacError::NotFound(what),
            StoreError::NotFound(what) => RbacError::NotFound(format!("{what} not found")),
            StoreError::Conflict(message) => RbacError::Conflict(message),
            StoreError::Invalid(message) => RbacError::BadRequest(message),
            StoreError::Unexpected(err) => {
                tracing::error!(
                    op,
                    workspace_id = %ctx.workspace_id,
                    error = ?err,
                    "rbac storage error"
                );
                RbacError::Internal(format!("failed to {}", op.replace('_', " ")))
            }
        };
        metrics::counter!(RBAC_ERRORS_TOTAL, "kind" => mapped.kind()).increment(1);
        mapped
    }

    /// The key, if it exists in the workspace and is not soft-deleted.
    pub(crate) async fn require_active_key(
        &self,
        op: &'static str,
        ctx: &WorkspaceContext,
        key_id: &str,
    ) -> RbacResult<Key> {
        let key = self
            .keys
            .get_key(&ctx.workspace_id, key_id)
            .await
            .map_err(|err| self.classify(op, ctx, err))?;
        match key {
            Some(key) if key.is_active() && key.workspace_id == ctx.workspace_id => Ok(key),
            _ => {
                metrics::counter!(RBAC_ERRORS_TOTAL, "kind" => "not_found").increment(1);
                Err(RbacError::NotFound("key not found".to_string()))
            }
        }
    }

    pub(crate) fn entry(
        &self,
        ctx: &WorkspaceContext,
        event: AuditEvent,
        description: String,
        resources: Vec<AuditResource>,
    ) -> AuditEntry {
        AuditEntry {
            workspace_id: ctx.workspace_id.clone(),
            actor: ctx.actor.clone(),
            event,
            description,
            resources,
            context: ctx.audit.clone(),
        }
    }

    /// Hand committed-mutation entries to the sink; failures are logged only.
    pub(crate) async fn emit(&self, ctx: &WorkspaceContext, entries: Vec<AuditEntry>) {
        if entries.is_empty() {
            return;
        }
        let count = entries.len();
        if let Err(err) = self.audit.record(entries).await {
            tracing::warn!(
                workspace_id = %ctx.workspace_id,
                entries = count,
                error = %err,
                "audit sink rejected entries"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::test_support::{ctx, harness};

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let ids = vec![
            "b".to_string(),
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "a".to_string(),
        ];
        assert_eq!(dedup_ids(&ids), vec!["b", "a", "c"]);
    }

    #[test]
    fn names_are_trimmed_and_required() {
        assert_eq!(require_name("name", "  admin ").unwrap(), "admin");
        assert_eq!(
            require_name("name", "   ").unwrap_err(),
            RbacError::BadRequest("name must not be empty".to_string())
        );
    }

    #[test]
    fn missing_ids_are_listed() {
        let requested = vec!["r1".to_string(), "r2".to_string(), "r3".to_string()];
        let err = require_all_found("roles", &requested, ["r2"]).unwrap_err();
        assert_eq!(
            err,
            RbacError::BadRequest("roles not found: r1, r3".to_string())
        );
        assert!(require_all_found("roles", &requested, ["r1", "r2", "r3"]).is_ok());
    }

    #[tokio::test]
    async fn store_errors_map_to_domain_errors() {
        let h = harness().await;
        let ctx = ctx("ws_1");
        let svc = &h.service;
        assert_eq!(
            svc.classify("get_role", &ctx, StoreError::NotFound("role".into())),
            RbacError::NotFound("role not found".into())
        );
        assert_eq!(
            svc.classify(
                "delete_roles",
                &ctx,
                StoreError::NotFound("roles not found: r1".into())
            ),
            RbacError::NotFound("roles not found: r1".into())
        );
        assert_eq!(
            svc.classify("create_role", &ctx, StoreError::Invalid("bad".into())),
            RbacError::BadRequest("bad".into())
        );
        assert_eq!(
            svc.classify(
                "create_role",
                &ctx,
                StoreError::Unexpected(anyhow::anyhow!("pool closed"))
            ),
            RbacError::Internal("failed to create role".into())
        );
    }

    #[tokio::test]
    async fn soft_deleted_and_foreign_keys_are_not_found() {
        let h = harness().await;
        let err = h
            .service
            .require_active_key("resolve_by_key", &ctx("ws_1"), "key_2")
            .await
            .unwrap_err();
        assert_eq!(err, RbacError::NotFound("key not found".into()));

        h.store.soft_delete_key("ws_1", "key_1").await.unwrap();
        let err = h
            .service
            .require_active_key("resolve_by_key", &ctx("ws_1"), "key_1")
            .await
            .unwrap_err();
        assert_eq!(err, RbacError::NotFound("key not found".into()));
    }
}
