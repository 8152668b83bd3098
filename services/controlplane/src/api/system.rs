//! System/health API handlers.
//!
//! # Purpose and responsibility
//! Provides a lightweight health endpoint for load balancers and orchestrators.
//!
//! # Key invariants and assumptions
//! - Health checks must be fast and side-effect free.
//! - No workspace header is required.
use crate::api::error::{ApiError, api_internal};
use crate::api::types::HealthStatus;
use crate::app::AppState;
use axum::Json;
use axum::extract::State;

#[utoipa::path(
    get,
    path = "/v1/system/health",
    tag = "system",
    responses(
        (status = 200, description = "Service health", body = HealthStatus),
        (status = 500, description = "Storage unavailable", body = crate::api::types::ErrorResponse)
    )
)]
/// Probe the backing store and report `ok` if it answers.
pub(crate) async fn system_health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, ApiError> {
    let store = state.rbac.store();
    if let Err(err) = store.health_check().await {
        return Err(api_internal("storage unavailable", &err));
    }
    Ok(Json(HealthStatus {
        status: "ok".to_string(),
        backend: store.backend_name().to_string(),
        durable: store.is_durable(),
    }))
}
