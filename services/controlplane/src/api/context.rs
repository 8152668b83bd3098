//! Workspace and actor extraction from gateway headers.
//!
//! # Purpose
//! The authenticating gateway in front of this service resolves the caller
//! and forwards the result as headers. Handlers turn those headers into a
//! [`RequestScope`] before touching the service.
//!
//! # Security considerations
//! - Headers are trusted only because the gateway strips client-supplied
//!   copies. This service must not be exposed without it.
//! - A missing or blank workspace header is rejected with 401.
use crate::api::error::{ApiError, api_unauthorized};
use crate::audit::{Actor, ActorKind, AuditContext};
use crate::rbac::{RbacError, WorkspaceContext};
use axum::http::HeaderMap;

pub const WORKSPACE_HEADER: &str = "x-workspace-id";
pub const ACTOR_HEADER: &str = "x-actor-id";
pub const ACTOR_KIND_HEADER: &str = "x-actor-kind";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

pub(crate) struct RequestScope {
    pub ctx: WorkspaceContext,
    pub request_id: Option<String>,
}

impl RequestScope {
    pub(crate) fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let request_id = header(headers, REQUEST_ID_HEADER);
        let workspace_id = header(headers, WORKSPACE_HEADER).ok_or_else(|| {
            api_unauthorized("missing workspace").with_request_id(request_id.clone())
        })?;
        let actor = match header(headers, ACTOR_HEADER) {
            Some(id) => Actor {
                kind: actor_kind(header(headers, ACTOR_KIND_HEADER).as_deref()),
                id,
            },
            None => Actor::system(),
        };
        let audit = AuditContext {
            location: header(headers, FORWARDED_FOR_HEADER)
                .and_then(|value| value.split(',').next().map(|ip| ip.trim().to_string())),
            user_agent: header(headers, axum::http::header::USER_AGENT.as_str()),
        };
        Ok(Self {
            ctx: WorkspaceContext::new(workspace_id, actor).with_audit(audit),
            request_id,
        })
    }

    /// Map a service error onto the HTTP error shape for this request.
    pub(crate) fn reject(&self, err: RbacError) -> ApiError {
        ApiError::from(err).with_request_id(self.request_id.clone())
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn actor_kind(value: Option<&str>) -> ActorKind {
    match value {
        Some("key") => ActorKind::Key,
        Some("system") => ActorKind::System,
        _ => ActorKind::User,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    #[test]
    fn missing_workspace_is_unauthorized() {
        let mut headers = HeaderMap::new();
        headers.insert(WORKSPACE_HEADER, HeaderValue::from_static("  "));
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-7"));
        let err = RequestScope::from_headers(&headers).err().unwrap();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.body.request_id.as_deref(), Some("req-7"));
    }

    #[test]
    fn actor_and_audit_context_come_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(WORKSPACE_HEADER, HeaderValue::from_static("ws_1"));
        headers.insert(ACTOR_HEADER, HeaderValue::from_static("key_root"));
        headers.insert(ACTOR_KIND_HEADER, HeaderValue::from_static("key"));
        headers.insert(
            FORWARDED_FOR_HEADER,
            HeaderValue::from_static("10.0.0.1, 10.0.0.2"),
        );
        headers.insert(
            axum::http::header::USER_AGENT,
            HeaderValue::from_static("keygate-cli/1.0"),
        );
        let scope = RequestScope::from_headers(&headers).unwrap();
        assert_eq!(scope.ctx.workspace_id, "ws_1");
        assert_eq!(scope.ctx.actor.kind, ActorKind::Key);
        assert_eq!(scope.ctx.actor.id, "key_root");
        assert_eq!(scope.ctx.audit.location.as_deref(), Some("10.0.0.1"));
        assert_eq!(scope.ctx.audit.user_agent.as_deref(), Some("keygate-cli/1.0"));
    }

    #[test]
    fn absent_actor_is_system() {
        let mut headers = HeaderMap::new();
        headers.insert(WORKSPACE_HEADER, HeaderValue::from_static("ws_1"));
        let scope = RequestScope::from_headers(&headers).unwrap();
        assert_eq!(scope.ctx.actor, Actor::system());
    }
}
