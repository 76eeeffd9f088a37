use service_core::axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{dtos::resource::ScopesResponse, middleware::AuthUser, AppState};

/// Effective scopes of the caller on a resource
#[utoipa::path(
    get,
    path = "/api/resources/{resource_id}/scopes",
    params(("resource_id" = Uuid, Path, description = "Resource ID")),
    responses(
        (status = 200, description = "Resolved scopes", body = ScopesResponse),
        (status = 404, description = "Resource not found", body = ErrorResponse)
    ),
    tag = "Resource",
    security(("bearer_auth" = []))
)]
pub async fn scopes(
    State(state): State<AppState>,
    user: AuthUser,
    Path(resource_id): Path<Uuid>,
) -> Result<Json<ScopesResponse>, AppError> {
    let entry = state
        .cache
        .cached_privileges(user.identity_id(), resource_id)
        .await?;
    Ok(Json(entry.into()))
}
