//! OpenShift cluster linking provider.

use serde::Deserialize;
use service_core::error::AppError;
use std::time::Duration;

use super::oauth::OAuthClient;
use super::UserProfile;
use crate::config::OpenShiftConfig;

pub const OPENSHIFT_PROVIDER_ALIAS: &str = "openshift";
pub const OPENSHIFT_TYPE_NAME: &str = "openshift-v3";

#[derive(Debug, Deserialize)]
struct OpenShiftUser {
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    name: String,
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

pub fn client(
    config: &OpenShiftConfig,
    link_callback_url: &str,
    timeout: Duration,
) -> Result<OAuthClient, AppError> {
    let api_url = with_trailing_slash(&config.cluster_url);
    OAuthClient::new(
        config.token_provider_id,
        &config.client_id,
        &config.client_secret,
        format!("{}oauth/authorize", api_url),
        format!("{}oauth/token", api_url),
        format!("{}oapi/v1/users/~", api_url),
        link_callback_url,
        config.scopes.clone(),
        timeout,
    )
}

pub fn decode_profile(body: &[u8]) -> Result<UserProfile, AppError> {
    let user: OpenShiftUser = serde_json::from_slice(body)
        .map_err(|e| AppError::BadGateway(format!("Invalid OpenShift profile payload: {}", e)))?;
    Ok(UserProfile {
        username: user.metadata.name,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_metadata_name() {
        let profile =
            decode_profile(br#"{"kind":"User","metadata":{"name":"developer"}}"#).unwrap();
        assert_eq!(profile.username, "developer");
    }

    #[test]
    fn test_endpoints_derive_from_cluster_url() {
        let config = OpenShiftConfig {
            token_provider_id: uuid::Uuid::new_v4(),
            cluster_url: "https://api.cluster.example.com".to_string(),
            client_id: "openshift-io".to_string(),
            client_secret: "secret".to_string(),
            scopes: vec!["user:full".to_string()],
        };
        let client = client(&config, "http://localhost/link", Duration::from_secs(1)).unwrap();
        assert_eq!(client.token_url, "https://api.cluster.example.com/oauth/token");
        assert_eq!(client.profile_url, "https://api.cluster.example.com/oapi/v1/users/~");
    }
}
