use service_core::axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::invitation::{AcceptResponse, InvitationResponse, IssueInvitationsRequest},
    middleware::AuthUser,
    utils::ValidatedJson,
    AppState,
};

/// Issue invitations on a resource, team or organization
#[utoipa::path(
    post,
    path = "/api/invitations/{target_id}",
    request_body = IssueInvitationsRequest,
    params(("target_id" = Uuid, Path, description = "Resource or group identity ID")),
    responses(
        (status = 201, description = "Invitations issued", body = [InvitationResponse]),
        (status = 400, description = "Invalid invitation", body = ErrorResponse),
        (status = 403, description = "Missing invitation scope", body = ErrorResponse),
        (status = 404, description = "Target or invitee not found", body = ErrorResponse)
    ),
    tag = "Invitation",
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip(state, user, req), fields(issuer_id = %user.identity_id()))]
pub async fn issue(
    State(state): State<AppState>,
    user: AuthUser,
    Path(target_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<IssueInvitationsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invitations = state
        .invitations
        .issue(user.identity_id(), target_id, req.invitations)
        .await?;
    let res: Vec<InvitationResponse> = invitations.into_iter().map(Into::into).collect();
    Ok((StatusCode::CREATED, Json(res)))
}

/// List pending invitations on a target
#[utoipa::path(
    get,
    path = "/api/invitations/{target_id}",
    params(("target_id" = Uuid, Path, description = "Resource or group identity ID")),
    responses(
        (status = 200, description = "Pending invitations", body = [InvitationResponse]),
        (status = 403, description = "Missing invitation scope", body = ErrorResponse)
    ),
    tag = "Invitation",
    security(("bearer_auth" = []))
)]
pub async fn list(
    State(state): State<AppState>,
    user: AuthUser,
    Path(target_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let invitations = state
        .invitations
        .list_pending(user.identity_id(), target_id)
        .await?;
    let res: Vec<InvitationResponse> = invitations.into_iter().map(Into::into).collect();
    Ok(Json(res))
}

/// Accept an invitation by its single-use code
#[utoipa::path(
    get,
    path = "/api/invitations/accept/{accept_code}",
    params(("accept_code" = String, Path, description = "Code from the invitation message")),
    responses(
        (status = 200, description = "Accepted", body = AcceptResponse),
        (status = 303, description = "Accepted, redirecting to the success URL"),
        (status = 404, description = "Unknown or already used code", body = ErrorResponse)
    ),
    tag = "Invitation"
)]
pub async fn accept(
    State(state): State<AppState>,
    Path(accept_code): Path<String>,
) -> Result<Response, AppError> {
    let outcome = state.invitations.accept(&accept_code).await?;
    Ok(match outcome.redirect_on_success {
        Some(url) => Redirect::to(&url).into_response(),
        None => Json(AcceptResponse {
            resource_id: outcome.resource_id,
        })
        .into_response(),
    })
}

/// Rescind a pending invitation
#[utoipa::path(
    delete,
    path = "/api/invitations/{invitation_id}",
    params(("invitation_id" = Uuid, Path, description = "Invitation ID")),
    responses(
        (status = 204, description = "Rescinded"),
        (status = 403, description = "Missing invitation scope", body = ErrorResponse),
        (status = 404, description = "Invitation not found", body = ErrorResponse)
    ),
    tag = "Invitation",
    security(("bearer_auth" = []))
)]
pub async fn rescind(
    State(state): State<AppState>,
    user: AuthUser,
    Path(invitation_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .invitations
        .rescind(user.identity_id(), invitation_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
