//! Audit entry model and sink seam.
//!
//! # Purpose and responsibility
//! Every committed RBAC mutation produces structured audit entries. The audit
//! log itself lives outside this service; `AuditSink` is the seam it plugs into.
//!
//! # Key invariants and assumptions
//! - Entries are emitted only after the owning transaction has committed.
//! - Entries are append-only; sinks must not reorder entries within one call.
//! - A sink failure never undoes a committed mutation; callers log and move on.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use utoipa::ToSchema;

/// Who performed the mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub kind: ActorKind,
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum ActorKind {
    User,
    Key,
    System,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            kind: ActorKind::System,
            id: "system".to_string(),
        }
    }
}

/// Request metadata attached to each entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditContext {
    pub location: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum AuditEvent {
    #[serde(rename = "permission.create")]
    PermissionCreate,
    #[serde(rename = "permission.update")]
    PermissionUpdate,
    #[serde(rename = "permission.delete")]
    PermissionDelete,
    #[serde(rename = "role.create")]
    RoleCreate,
    #[serde(rename = "role.update")]
    RoleUpdate,
    #[serde(rename = "role.delete")]
    RoleDelete,
    #[serde(rename = "authorization.connect_role_and_permission")]
    ConnectRoleAndPermission,
    #[serde(rename = "authorization.disconnect_role_and_permission")]
    DisconnectRoleAndPermission,
    #[serde(rename = "authorization.connect_role_and_key")]
    ConnectRoleAndKey,
    #[serde(rename = "authorization.disconnect_role_and_key")]
    DisconnectRoleAndKey,
    #[serde(rename = "authorization.connect_permission_and_key")]
    ConnectPermissionAndKey,
    #[serde(rename = "authorization.disconnect_permission_and_key")]
    DisconnectPermissionAndKey,
    #[serde(rename = "authorization.replace_key_rbac")]
    ReplaceKeyRbac,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::PermissionCreate => "permission.create",
            AuditEvent::PermissionUpdate => "permission.update",
            AuditEvent::PermissionDelete => "permission.delete",
            AuditEvent::RoleCreate => "role.create",
            AuditEvent::RoleUpdate => "role.update",
            AuditEvent::RoleDelete => "role.delete",
            AuditEvent::ConnectRoleAndPermission => "authorization.connect_role_and_permission",
            AuditEvent::DisconnectRoleAndPermission => {
                "authorization.disconnect_role_and_permission"
            }
            AuditEvent::ConnectRoleAndKey => "authorization.connect_role_and_key",
            AuditEvent::DisconnectRoleAndKey => "authorization.disconnect_role_and_key",
            AuditEvent::ConnectPermissionAndKey => "authorization.connect_permission_and_key",
            AuditEvent::DisconnectPermissionAndKey => {
                "authorization.disconnect_permission_and_key"
            }
            AuditEvent::ReplaceKeyRbac => "authorization.replace_key_rbac",
        }
    }
}

/// A resource touched by a mutation (`kind` is `key`, `role`, or `permission`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditResource {
    pub kind: String,
    pub id: String,
    pub name: Option<String>,
}

impl AuditResource {
    pub fn key(id: &str) -> Self {
        Self {
            kind: "key".to_string(),
            id: id.to_string(),
            name: None,
        }
    }

    pub fn role(id: &str, name: Option<&str>) -> Self {
        Self {
            kind: "role".to_string(),
            id: id.to_string(),
            name: name.map(str::to_string),
        }
    }

    pub fn permission(id: &str, name: Option<&str>) -> Self {
        Self {
            kind: "permission".to_string(),
            id: id.to_string(),
            name: name.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub workspace_id: String,
    pub actor: Actor,
    pub event: AuditEvent,
    pub description: String,
    pub resources: Vec<AuditResource>,
    pub context: AuditContext,
}

/// Append-only destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entries: Vec<AuditEntry>) -> anyhow::Result<()>;
}

/// Writes entries as structured `tracing` events under the `keygate::audit` target.
///
/// Useful when the audit pipeline is a log shipper tailing service output.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entries: Vec<AuditEntry>) -> anyhow::Result<()> {
        for entry in entries {
            let resources = serde_json::to_string(&entry.resources)?;
            tracing::info!(
                target: "keygate::audit",
                workspace_id = %entry.workspace_id,
                actor_id = %entry.actor.id,
                event = entry.event.as_str(),
                resources = %resources,
                location = entry.context.location.as_deref().unwrap_or(""),
                "{}",
                entry.description
            );
        }
        Ok(())
    }
}

/// Captures entries in memory. Used by tests and local development.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.entries().iter().map(|entry| entry.event).collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entries: Vec<AuditEntry>) -> anyhow::Result<()> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("audit buffer poisoned"))?;
        guard.extend(entries);
        Ok(())
    }
}
