use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::services::{TokenGrant, TokenResponse};

pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// Token endpoint request. Which fields are required depends on
/// `grant_type`.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TokenRequest {
    #[validate(length(min = 1, message = "grant_type is required"))]
    #[schema(example = "client_credentials")]
    pub grant_type: String,
    pub client_id: Option<Uuid>,
    pub client_secret: Option<String>,
    pub code: Option<String>,
    pub refresh_token: Option<String>,
}

impl TryFrom<TokenRequest> for TokenGrant {
    type Error = AppError;

    fn try_from(req: TokenRequest) -> Result<Self, Self::Error> {
        let missing = |field: &str| {
            AppError::BadRequest(anyhow::anyhow!(
                "{} is required for grant type {}",
                field,
                req.grant_type
            ))
        };

        match req.grant_type.as_str() {
            GRANT_CLIENT_CREDENTIALS => Ok(TokenGrant::ClientCredentials {
                client_id: req.client_id.ok_or_else(|| missing("client_id"))?,
                client_secret: req.client_secret.clone().ok_or_else(|| missing("client_secret"))?,
            }),
            GRANT_AUTHORIZATION_CODE => Ok(TokenGrant::AuthorizationCode {
                code: req.code.clone().ok_or_else(|| missing("code"))?,
            }),
            GRANT_REFRESH_TOKEN => Ok(TokenGrant::RefreshToken {
                refresh_token: req.refresh_token.clone().ok_or_else(|| missing("refresh_token"))?,
            }),
            other => Err(AppError::BadRequest(anyhow::anyhow!(
                "unsupported grant type {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "refresh_token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditQuery {
    pub resource_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditResponse {
    /// `unchanged` or `reissued`
    #[schema(example = "reissued")]
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenResponse>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LinkQuery {
    /// Provider alias or the URL of the resource the provider guards.
    #[serde(rename = "for")]
    pub for_resource: String,
    pub redirect: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LinkCallbackQuery {
    pub code: String,
    pub state: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogoutResponse {
    pub tokens_logged_out: u64,
}
