//! OAuth2 authorization-code client shared by every provider variant.

use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::time::Duration;
use uuid::Uuid;

use super::{ProviderToken, UserProfile};

/// Endpoints and client credentials of one OAuth2 provider.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    pub provider_id: Uuid,
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub redirect_url: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl OAuthClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider_id: Uuid,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        profile_url: impl Into<String>,
        redirect_url: impl Into<String>,
        scopes: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            provider_id,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url: auth_url.into(),
            token_url: token_url.into(),
            profile_url: profile_url.into(),
            redirect_url: redirect_url.into(),
            scopes,
        })
    }

    /// Build the authorization URL the user agent is redirected to.
    pub fn auth_code_url(&self, state: &str) -> String {
        let separator = if self.auth_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.auth_url,
            separator,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_url),
            urlencoding::encode(&self.scopes.join(" ")),
            urlencoding::encode(state),
        )
    }

    /// Exchange an authorization code for a provider token.
    #[tracing::instrument(skip(self, code), fields(token_url = %self.token_url))]
    pub async fn exchange(&self, code: &str) -> Result<ProviderToken, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AppError::BadGateway(format!("Failed to contact identity provider: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, error = %error_text, "Code exchange failed");
            if status.is_client_error() {
                return Err(AppError::Unauthorized(anyhow::anyhow!(
                    "Authorization code was rejected by the identity provider"
                )));
            }
            return Err(AppError::BadGateway("Code exchange failed".to_string()));
        }

        let body = response.json::<TokenEndpointResponse>().await.map_err(|e| {
            AppError::BadGateway(format!("Failed to parse token response: {}", e))
        })?;

        Ok(ProviderToken {
            access_token: body.access_token,
            token_type: body.token_type.unwrap_or_else(|| "Bearer".to_string()),
            refresh_token: body.refresh_token,
            expires_in: body.expires_in,
            scope: body.scope,
        })
    }

    /// Fetch the raw profile document with the provider token.
    #[tracing::instrument(skip(self, token), fields(profile_url = %self.profile_url))]
    pub async fn profile_payload(&self, token: &ProviderToken) -> Result<Vec<u8>, AppError> {
        let response = self
            .http
            .get(&self.profile_url)
            .bearer_auth(&token.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, "access-service")
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Unable to get user profile");
                AppError::BadGateway(format!("Failed to fetch user profile: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, response_body = %error_text, "Unable to get user profile");
            return Err(AppError::BadGateway("Unable to get user profile".to_string()));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| AppError::BadGateway(format!("Failed to read user profile payload: {}", e)))
    }
}

/// Standard OIDC userinfo claims.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct OidcUserInfo {
    #[serde(default)]
    pub preferred_username: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub sub: String,
}

/// Decode a generic OIDC userinfo document.
pub fn decode_generic_profile(body: &[u8]) -> Result<UserProfile, AppError> {
    let info: OidcUserInfo = serde_json::from_slice(body)
        .map_err(|e| AppError::BadGateway(format!("Invalid user profile payload: {}", e)))?;

    let name = format!("{} {}", info.given_name, info.family_name)
        .trim()
        .to_string();
    Ok(UserProfile {
        name,
        username: info.preferred_username,
        given_name: info.given_name,
        family_name: info.family_name,
        email: info.email,
        email_verified: info.email_verified,
        company: info.company,
        approved: info.approved,
        subject: info.sub,
    })
}
