//! GitHub linking provider.

use serde::Deserialize;
use service_core::error::AppError;
use std::time::Duration;

use super::oauth::OAuthClient;
use super::{UserProfile, GITHUB_PROVIDER_ID};
use crate::config::GitHubConfig;

pub const GITHUB_PROVIDER_ALIAS: &str = "github";
pub const GITHUB_URL: &str = "https://github.com";

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

pub fn client(
    config: &GitHubConfig,
    link_callback_url: &str,
    timeout: Duration,
) -> Result<OAuthClient, AppError> {
    OAuthClient::new(
        GITHUB_PROVIDER_ID,
        &config.client_id,
        &config.client_secret,
        &config.auth_url,
        &config.token_url,
        format!("{}/user", config.api_url.trim_end_matches('/')),
        link_callback_url,
        config.scopes.clone(),
        timeout,
    )
}

/// GitHub only reports the login name.
pub fn decode_profile(body: &[u8]) -> Result<UserProfile, AppError> {
    let user: GitHubUser = serde_json::from_slice(body)
        .map_err(|e| AppError::BadGateway(format!("Invalid GitHub profile payload: {}", e)))?;
    Ok(UserProfile {
        username: user.login,
        ..Default::default()
    })
}
