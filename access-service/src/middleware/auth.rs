use service_core::axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{services::AuthenticatedToken, AppState};

/// Bearer token accepted by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Require a bearer JWT whose persisted token is not revoked, logged out or
/// deprovisioned.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let raw = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

    let authenticated = state.tokens.authenticate(&raw).await.map_err(|e| {
        tracing::debug!(error = %e, "Bearer token rejected");
        e
    })?;

    req.extensions_mut().insert(authenticated);
    req.extensions_mut().insert(BearerToken(raw));

    Ok(next.run(req).await)
}

/// Extractor for the authenticated caller.
pub struct AuthUser {
    pub token: AuthenticatedToken,
    pub raw: String,
}

impl AuthUser {
    pub fn identity_id(&self) -> Uuid {
        self.token.identity_id()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .extensions
            .get::<AuthenticatedToken>()
            .cloned()
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!(
                    "Auth token missing from request extensions"
                ))
            })?;
        let BearerToken(raw) = parts.extensions.get::<BearerToken>().cloned().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!("Bearer token missing from request extensions"))
        })?;

        Ok(AuthUser { token, raw })
    }
}
