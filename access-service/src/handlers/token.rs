use service_core::axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::token::{
        AuditQuery, AuditResponse, LinkCallbackQuery, LinkQuery, LogoutResponse, RefreshRequest,
        TokenRequest,
    },
    middleware::AuthUser,
    services::{AuditOutcome, TokenGrant},
    utils::ValidatedJson,
    AppState,
};

/// Exchange a grant for tokens
#[utoipa::path(
    post,
    path = "/api/token",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Malformed grant", body = ErrorResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 502, description = "Identity provider failure", body = ErrorResponse)
    ),
    tag = "Token"
)]
pub async fn exchange(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<TokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let grant = TokenGrant::try_from(req)?;
    let res = state.tokens.exchange(grant).await?;
    Ok((StatusCode::OK, Json(res)))
}

/// Rotate a refresh token
#[utoipa::path(
    post,
    path = "/api/token/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed", body = TokenResponse),
        (status = 401, description = "Invalid, revoked or expired token", body = ErrorResponse)
    ),
    tag = "Token"
)]
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.tokens.refresh(&req.refresh_token).await?;
    Ok((StatusCode::OK, Json(res)))
}

/// Re-validate the caller's token against current privileges on a resource
#[utoipa::path(
    post,
    path = "/api/token/audit",
    params(AuditQuery),
    responses(
        (status = 200, description = "Audit result", body = AuditResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 404, description = "Resource not found", body = ErrorResponse)
    ),
    tag = "Token",
    security(("bearer_auth" = []))
)]
pub async fn audit(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<AuditQuery>,
) -> Result<impl IntoResponse, AppError> {
    let res = match state.tokens.audit(&user.raw, query.resource_id).await? {
        AuditOutcome::Unchanged => AuditResponse {
            status: "unchanged".to_string(),
            token: None,
        },
        AuditOutcome::Reissued(token) => AuditResponse {
            status: "reissued".to_string(),
            token: Some(token),
        },
    };
    Ok((StatusCode::OK, Json(res)))
}

/// Start linking an external account
#[utoipa::path(
    get,
    path = "/api/token/link",
    params(LinkQuery),
    responses(
        (status = 303, description = "Redirect to the provider"),
        (status = 400, description = "No provider for the resource", body = ErrorResponse)
    ),
    tag = "Token",
    security(("bearer_auth" = []))
)]
pub async fn link(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<LinkQuery>,
) -> Result<Redirect, AppError> {
    let url = state
        .tokens
        .link_url(user.identity_id(), &query.for_resource, &query.redirect)
        .await?;
    Ok(Redirect::to(&url))
}

/// Provider callback completing an account link
#[utoipa::path(
    get,
    path = "/api/token/link/callback",
    params(LinkCallbackQuery),
    responses(
        (status = 303, description = "Redirect to the caller's original URL"),
        (status = 400, description = "Unknown or expired state", body = ErrorResponse)
    ),
    tag = "Token"
)]
pub async fn link_callback(
    State(state): State<AppState>,
    Query(query): Query<LinkCallbackQuery>,
) -> Result<Redirect, AppError> {
    let linked = state.tokens.link_callback(&query.code, &query.state).await?;
    Ok(Redirect::to(&linked.redirect))
}

/// Log out every token of the caller
#[utoipa::path(
    post,
    path = "/api/logout",
    responses(
        (status = 200, description = "Logged out", body = LogoutResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "Token",
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let tokens_logged_out = state.tokens.logout(user.identity_id()).await?;
    Ok((StatusCode::OK, Json(LogoutResponse { tokens_logged_out })))
}
