//! Slug resolution handler.
use crate::api::context::RequestScope;
use crate::api::error::ApiError;
use crate::api::types::SlugsRequest;
use crate::app::AppState;
use crate::rbac::SlugResolution;
use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;

#[utoipa::path(
    post,
    path = "/v1/rbac/slugs",
    tag = "rbac",
    request_body = SlugsRequest,
    responses(
        (status = 200, description = "Sorted, de-duplicated permission slugs", body = SlugResolution),
        (status = 400, description = "Unknown role or permission ids", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn resolve_slugs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SlugsRequest>,
) -> Result<Json<SlugResolution>, ApiError> {
    let scope = RequestScope::from_headers(&headers)?;
    let resolution = state
        .rbac
        .resolve_slugs(&scope.ctx, &body.role_ids, &body.permission_ids)
        .await
        .map_err(|err| scope.reject(err))?;
    Ok(Json(resolution))
}
