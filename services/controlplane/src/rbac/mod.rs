//! RBAC domain service.
//!
//! # Purpose and responsibility
//! `RbacService` is the one entry point for every RBAC operation. It validates
//! caller input against the requesting workspace, runs the store mutation,
//! and emits audit entries once the mutation has committed.
//!
//! # Key invariants and assumptions
//! - Referenced ids are validated by count comparison before any write.
//!   Duplicate ids are collapsed first.
//! - Classified failures (`NotFound`, `BadRequest`, `Conflict`) pass through
//!   unchanged. Anything else is logged and surfaced as `Internal`.
//! - A failed audit write never fails an operation whose mutation committed.
//!
//! # Security considerations
//! - The workspace id on [`WorkspaceContext`] is trusted; it comes from the
//!   upstream authenticating gateway. Everything else is caller input.
//! - Rows from another workspace are reported exactly like missing rows.
use crate::audit::{Actor, AuditContext, AuditSink};
use crate::store::{KeyStore, RbacStore};
use std::sync::Arc;
use thiserror::Error;

pub mod bindings;
pub mod categorize;
pub mod permissions;
pub mod resolver;
pub mod roles;
mod validate;

pub use bindings::{KeyRbacReplaced, ReplaceKeyRbac};
pub use categorize::{PermissionSummary, categorize};
pub use resolver::{
    EffectivePermission, KeyRbacView, PermissionSource, ResolvedKey, ResolvedRole, RoleRbacView,
    SlugBreakdown, SlugResolution,
};
pub use roles::CreateRole;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RbacError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl RbacError {
    /// Stable label used for the error metric.
    pub fn kind(&self) -> &'static str {
        match self {
            RbacError::NotFound(_) => "not_found",
            RbacError::BadRequest(_) => "bad_request",
            RbacError::Conflict(_) => "conflict",
            RbacError::Internal(_) => "internal",
        }
    }
}

pub type RbacResult<T> = Result<T, RbacError>;

/// The workspace, actor, and request metadata an operation runs under.
#[derive(Debug, Clone)]
pub struct WorkspaceContext {
    pub workspace_id: String,
    pub actor: Actor,
    pub audit: AuditContext,
}

impl WorkspaceContext {
    pub fn new(workspace_id: impl Into<String>, actor: Actor) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            actor,
            audit: AuditContext::default(),
        }
    }

    pub fn with_audit(mut self, audit: AuditContext) -> Self {
        self.audit = audit;
        self
    }
}

#[derive(Clone)]
pub struct RbacService {
    store: Arc<dyn RbacStore>,
    keys: Arc<dyn KeyStore>,
    audit: Arc<dyn AuditSink>,
}

impl RbacService {
    pub fn new(
        store: Arc<dyn RbacStore>,
        keys: Arc<dyn KeyStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { store, keys, audit }
    }

    pub fn store(&self) -> &Arc<dyn RbacStore> {
        &self.store
    }
}
