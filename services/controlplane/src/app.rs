//! HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and defines the shared
//! application state injected into handlers.
//!
//! # Notes
//! Route composition lives here to keep `main` small and testable.
use crate::api;
use crate::api::openapi::ApiDoc;
use crate::observability;
use crate::rbac::RbacService;
use axum::Router;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use utoipa::OpenApi;

#[derive(Clone)]
pub struct AppState {
    pub rbac: RbacService,
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                workspace_id = request
                    .headers()
                    .get(api::context::WORKSPACE_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
            );
            span.set_parent(parent);
            span
        });

    Router::new()
        .route("/v1/system/health", get(api::system::system_health))
        .route(
            "/v1/permissions",
            get(api::permissions::list_permissions).post(api::permissions::create_permission),
        )
        .route(
            "/v1/permissions/upsert",
            post(api::permissions::upsert_permissions),
        )
        .route(
            "/v1/permissions/:permission_id",
            get(api::permissions::get_permission)
                .patch(api::permissions::update_permission)
                .delete(api::permissions::delete_permission),
        )
        .route(
            "/v1/roles",
            get(api::roles::list_roles).post(api::roles::create_role),
        )
        .route("/v1/roles/delete", post(api::roles::delete_roles))
        .route(
            "/v1/roles/:role_id",
            get(api::roles::get_role)
                .patch(api::roles::update_role)
                .delete(api::roles::delete_role),
        )
        .route(
            "/v1/roles/:role_id/permissions/:permission_id",
            put(api::roles::connect_permission).delete(api::roles::disconnect_permission),
        )
        .route("/v1/roles/:role_id/rbac", get(api::roles::role_rbac))
        .route(
            "/v1/keys/:key_id/roles/:role_id",
            put(api::keys::connect_role).delete(api::keys::disconnect_role),
        )
        .route(
            "/v1/keys/:key_id/permissions/:permission_id",
            put(api::keys::connect_permission).delete(api::keys::disconnect_permission),
        )
        .route(
            "/v1/keys/:key_id/rbac",
            get(api::keys::key_rbac).put(api::keys::replace_rbac),
        )
        .route("/v1/rbac/slugs", post(api::resolve::resolve_slugs))
        .merge(
            utoipa_swagger_ui::SwaggerUi::new("/docs").url("/v1/openapi.json", ApiDoc::openapi()),
        )
        .layer(trace_layer)
        .with_state(state)
}
