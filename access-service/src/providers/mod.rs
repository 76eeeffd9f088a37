//! External identity providers.
//!
//! Every provider is one variant of [`OAuthProvider`] and is used through the
//! [`IdentityProvider`] trait. Variants differ only in endpoints, profile
//! shape and their fixed provider ID.

use serde::{Deserialize, Serialize};
use service_core::axum::async_trait;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::AccessConfig;

pub mod github;
pub mod oauth;
pub mod openshift;

pub use oauth::OAuthClient;

/// Persisted on linked external tokens. Fixed, never configurable.
pub const GITHUB_PROVIDER_ID: Uuid = Uuid::from_u128(0x2f6b7176_8f4b_4204_962d_606033275397);
pub const GENERIC_PROVIDER_ID: &str = "6f7a6a1d-8f0e-4c1b-9a55-3a8f2a1c0b11";

pub const LINK_CALLBACK_PATH: &str = "/api/token/link/callback";

/// Token obtained from a provider's token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderToken {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

/// Identity facts reported by a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub username: String,
    pub given_name: String,
    pub family_name: String,
    pub email: String,
    pub email_verified: bool,
    pub company: String,
    pub approved: bool,
    pub subject: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn exchange(&self, code: &str) -> Result<ProviderToken, AppError>;
    fn auth_code_url(&self, state: &str) -> String;
    async fn profile(&self, token: &ProviderToken) -> Result<UserProfile, AppError>;
    fn id(&self) -> Uuid;
    fn scopes(&self) -> String;
    fn type_name(&self) -> &'static str;
    fn url(&self) -> String;
}

/// Closed set of supported providers.
#[derive(Debug, Clone)]
pub enum OAuthProvider {
    GitHub(OAuthClient),
    OpenShift { client: OAuthClient, cluster_url: String },
    Generic(OAuthClient),
}

impl OAuthProvider {
    fn client(&self) -> &OAuthClient {
        match self {
            OAuthProvider::GitHub(client)
            | OAuthProvider::OpenShift { client, .. }
            | OAuthProvider::Generic(client) => client,
        }
    }

    fn decode_profile(&self, body: &[u8]) -> Result<UserProfile, AppError> {
        match self {
            OAuthProvider::GitHub(_) => github::decode_profile(body),
            OAuthProvider::OpenShift { .. } => openshift::decode_profile(body),
            OAuthProvider::Generic(_) => oauth::decode_generic_profile(body),
        }
    }
}

#[async_trait]
impl IdentityProvider for OAuthProvider {
    async fn exchange(&self, code: &str) -> Result<ProviderToken, AppError> {
        self.client().exchange(code).await
    }

    fn auth_code_url(&self, state: &str) -> String {
        self.client().auth_code_url(state)
    }

    async fn profile(&self, token: &ProviderToken) -> Result<UserProfile, AppError> {
        let body = self.client().profile_payload(token).await?;
        self.decode_profile(&body)
    }

    fn id(&self) -> Uuid {
        self.client().provider_id
    }

    fn scopes(&self) -> String {
        self.client().scopes.join(" ")
    }

    fn type_name(&self) -> &'static str {
        match self {
            OAuthProvider::GitHub(_) => "github",
            OAuthProvider::OpenShift { .. } => openshift::OPENSHIFT_TYPE_NAME,
            OAuthProvider::Generic(_) => "oauth2",
        }
    }

    fn url(&self) -> String {
        match self {
            OAuthProvider::GitHub(_) => github::GITHUB_URL.to_string(),
            OAuthProvider::OpenShift { cluster_url, .. } => cluster_url.clone(),
            OAuthProvider::Generic(client) => client.auth_url.clone(),
        }
    }
}

/// Lookup of the login provider and the account-linking providers.
#[derive(Clone)]
pub struct ProviderRegistry {
    login: Arc<dyn IdentityProvider>,
    linking: Vec<(&'static str, Arc<dyn IdentityProvider>)>,
}

impl ProviderRegistry {
    pub fn new(login: Arc<dyn IdentityProvider>) -> Self {
        Self {
            login,
            linking: Vec::new(),
        }
    }

    pub fn with_linking_provider(
        mut self,
        alias: &'static str,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        self.linking.push((alias, provider));
        self
    }

    /// Build the registry from configuration.
    pub fn from_config(config: &AccessConfig) -> Result<Self, AppError> {
        let timeout = Duration::from_secs(config.oauth.timeout_seconds);
        let link_callback = format!(
            "{}{}",
            config.invitation.accept_url_base.trim_end_matches('/'),
            LINK_CALLBACK_PATH
        );

        let login = OAuthProvider::Generic(OAuthClient::new(
            config.oauth.provider_id,
            &config.oauth.client_id,
            &config.oauth.client_secret,
            &config.oauth.auth_url,
            &config.oauth.token_url,
            &config.oauth.profile_url,
            &config.oauth.redirect_url,
            config.oauth.scopes.clone(),
            timeout,
        )?);
        let github = OAuthProvider::GitHub(github::client(&config.github, &link_callback, timeout)?);
        let openshift = OAuthProvider::OpenShift {
            client: openshift::client(&config.openshift, &link_callback, timeout)?,
            cluster_url: config.openshift.cluster_url.clone(),
        };

        Ok(Self::new(Arc::new(login))
            .with_linking_provider(github::GITHUB_PROVIDER_ALIAS, Arc::new(github))
            .with_linking_provider(
                openshift::OPENSHIFT_PROVIDER_ALIAS,
                Arc::new(openshift),
            ))
    }

    pub fn login_provider(&self) -> Arc<dyn IdentityProvider> {
        self.login.clone()
    }

    /// Find a linking provider by alias (`github`, `openshift`) or by the
    /// URL of the resource it guards.
    pub fn linking_provider(
        &self,
        for_resource: &str,
    ) -> Result<Arc<dyn IdentityProvider>, AppError> {
        let wanted = for_resource.trim_end_matches('/');
        self.linking
            .iter()
            .find(|(alias, provider)| {
                alias.eq_ignore_ascii_case(wanted)
                    || wanted.starts_with(provider.url().trim_end_matches('/'))
            })
            .map(|(_, provider)| provider.clone())
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!(
                    "no linking provider found for {}",
                    for_resource
                ))
            })
    }
}
