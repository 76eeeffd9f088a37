//! Token lifecycle: issuance, refresh, authentication, revocation, audit
//! and purge.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

use super::jwt::{JwtService, Permission, TokenClaims, TokenResponse};
use super::privilege_cache::PrivilegeCacheService;
use crate::config::ServiceAccountConfig;
use crate::models::{Identity, PrivilegeCacheEntry, Token, TokenPrivilege, TokenStatus, TokenType};
use crate::providers::{ProviderRegistry, UserProfile};
use crate::repository::{DynStore, IdentityRepository, TokenRepository};

/// Pending account links expire after this many seconds.
const LINK_STATE_TTL_SECONDS: i64 = 600;

/// A grant presented to the token endpoint.
#[derive(Debug, Clone)]
pub enum TokenGrant {
    ClientCredentials { client_id: Uuid, client_secret: String },
    AuthorizationCode { code: String },
    RefreshToken { refresh_token: String },
}

/// A bearer token that passed signature and status checks.
#[derive(Debug, Clone)]
pub struct AuthenticatedToken {
    pub token: Token,
    pub claims: TokenClaims,
}

impl AuthenticatedToken {
    pub fn identity_id(&self) -> Uuid {
        self.token.identity_id
    }
}

#[derive(Debug, Clone)]
pub enum AuditOutcome {
    /// The presented token still reflects current privileges.
    Unchanged,
    /// A fresh RPT linked to current privilege snapshots.
    Reissued(TokenResponse),
}

#[derive(Debug, Clone)]
struct PendingLink {
    identity_id: Uuid,
    provider: String,
    redirect: String,
    expires_at: DateTime<Utc>,
}

/// Outcome of a completed account link.
#[derive(Debug, Clone)]
pub struct LinkedAccount {
    pub identity_id: Uuid,
    pub provider_id: Uuid,
    pub profile: UserProfile,
    pub redirect: String,
}

pub struct TokenService {
    store: DynStore,
    jwt: Arc<JwtService>,
    cache: Arc<PrivilegeCacheService>,
    providers: Arc<ProviderRegistry>,
    service_accounts: Vec<ServiceAccountConfig>,
    pending_links: Mutex<HashMap<String, PendingLink>>,
}

impl TokenService {
    pub fn new(
        store: DynStore,
        jwt: Arc<JwtService>,
        cache: Arc<PrivilegeCacheService>,
        providers: Arc<ProviderRegistry>,
        service_accounts: Vec<ServiceAccountConfig>,
    ) -> Self {
        Self {
            store,
            jwt,
            cache,
            providers,
            service_accounts,
            pending_links: Mutex::new(HashMap::new()),
        }
    }

    // ==================== Issuance ====================

    /// Persist and sign an access/refresh pair for an identity.
    #[instrument(skip(self))]
    pub async fn issue_token_pair(&self, identity_id: Uuid) -> Result<TokenResponse, AppError> {
        let access = self.create_token(identity_id, TokenType::Access).await?;
        let refresh = self.create_token(identity_id, TokenType::Refresh).await?;

        Ok(TokenResponse {
            access_token: self.sign(&access, None)?,
            refresh_token: Some(self.sign(&refresh, None)?),
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.lifetime_seconds(TokenType::Access),
        })
    }

    /// Dispatch a grant to its handler.
    pub async fn exchange(&self, grant: TokenGrant) -> Result<TokenResponse, AppError> {
        match grant {
            TokenGrant::ClientCredentials {
                client_id,
                client_secret,
            } => self.client_credentials(client_id, &client_secret).await,
            TokenGrant::AuthorizationCode { code } => self.authorization_code(&code).await,
            TokenGrant::RefreshToken { refresh_token } => self.refresh(&refresh_token).await,
        }
    }

    /// Issue a PAT to a configured service account.
    #[instrument(skip(self, client_secret))]
    async fn client_credentials(
        &self,
        client_id: Uuid,
        client_secret: &str,
    ) -> Result<TokenResponse, AppError> {
        let account = self
            .service_accounts
            .iter()
            .find(|account| account.id == client_id)
            .ok_or_else(|| {
                tracing::warn!(client_id = %client_id, "Unknown service account");
                AppError::Unauthorized(anyhow::anyhow!("invalid client credentials"))
            })?;

        if !bool::from(account.secret.as_bytes().ct_eq(client_secret.as_bytes())) {
            tracing::warn!(client_id = %client_id, "Service account secret mismatch");
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "invalid client credentials"
            )));
        }

        if self.store.find_identity(account.id).await?.is_none() {
            self.store
                .create_identity(&Identity::new_service(account.id, &account.name))
                .await?;
            tracing::info!(service = %account.name, "Service identity registered");
        }

        let pat = self.create_token(account.id, TokenType::Pat).await?;
        Ok(TokenResponse {
            access_token: self.sign(&pat, None)?,
            refresh_token: None,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.lifetime_seconds(TokenType::Pat),
        })
    }

    /// Log in through the configured OAuth provider, registering unknown
    /// users on first login.
    #[instrument(skip(self, code))]
    async fn authorization_code(&self, code: &str) -> Result<TokenResponse, AppError> {
        let provider = self.providers.login_provider();
        let provider_token = provider.exchange(code).await?;
        let profile = provider.profile(&provider_token).await?;

        if profile.username.is_empty() {
            return Err(AppError::BadGateway(
                "identity provider returned a profile without a username".to_string(),
            ));
        }

        let identity = match self.store.find_identity_by_username(&profile.username).await? {
            Some(identity) => identity,
            None => {
                let email = Some(profile.email.clone()).filter(|e| !e.is_empty());
                let identity = Identity::new_user(&profile.username, email);
                self.store.create_identity(&identity).await?;
                tracing::info!(
                    identity_id = %identity.identity_id,
                    provider = provider.type_name(),
                    "User registered on first login"
                );
                identity
            }
        };

        self.issue_token_pair(identity.identity_id).await
    }

    /// Rotate a refresh token: the presented one is revoked and a new pair
    /// is issued.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AppError> {
        let authenticated = self.authenticate(refresh_token).await?;
        if authenticated.token.token_type() != Some(TokenType::Refresh) {
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "not a refresh token"
            )));
        }

        // Only the caller whose write revokes the token may rotate it.
        let token = authenticated.token;
        if !self
            .store
            .set_token_status_flags(token.token_id, TokenStatus::REVOKED, TokenStatus::REJECTED)
            .await?
        {
            tracing::warn!(token_id = %token.token_id, "Refresh token already used");
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "token is no longer valid"
            )));
        }

        tracing::info!(identity_id = %token.identity_id, "Refresh token rotated");
        self.issue_token_pair(token.identity_id).await
    }

    // ==================== Validation ====================

    /// Verify signature and expiry, then the persisted status. `STALE`
    /// tokens still authenticate.
    pub async fn authenticate(&self, raw: &str) -> Result<AuthenticatedToken, AppError> {
        let claims = self.jwt.validate(raw)?;
        let token_id = claims.token_id().map_err(AppError::Unauthorized)?;

        let token = match self.store.load_token(token_id).await {
            Ok(token) => token,
            Err(AppError::NotFound(_)) => {
                return Err(AppError::Unauthorized(anyhow::anyhow!("unknown token")))
            }
            Err(e) => return Err(e),
        };

        if token.status().intersects(TokenStatus::REJECTED) {
            tracing::debug!(token_id = %token_id, status = token.status, "Rejected token presented");
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "token is no longer valid"
            )));
        }

        Ok(AuthenticatedToken { token, claims })
    }

    /// Re-validate a token's privileges on a resource against current state.
    #[instrument(skip(self, raw))]
    pub async fn audit(&self, raw: &str, resource_id: Uuid) -> Result<AuditOutcome, AppError> {
        let authenticated = self.authenticate(raw).await?;
        let identity_id = authenticated.identity_id();
        let token_id = authenticated.token.token_id;

        let current = self.cache.cached_privileges(identity_id, resource_id).await?;
        let linked = self.store.list_token_privileges(token_id).await?;

        if authenticated.token.valid()
            && linked
                .iter()
                .any(|entry| entry.privilege_cache_id == current.privilege_cache_id)
        {
            return Ok(AuditOutcome::Unchanged);
        }

        let mut snapshots = vec![current];
        for entry in linked {
            if snapshots.iter().any(|s| s.resource_id == entry.resource_id) {
                continue;
            }
            match self.cache.cached_privileges(identity_id, entry.resource_id).await {
                Ok(fresh) => snapshots.push(fresh),
                // The resource may have been removed since the token was issued.
                Err(AppError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        let rpt = self.issue_rpt(identity_id, &snapshots).await?;
        tracing::info!(
            token_id = %token_id,
            resource_id = %resource_id,
            "Token reissued against current privileges"
        );
        Ok(AuditOutcome::Reissued(rpt))
    }

    async fn issue_rpt(
        &self,
        identity_id: Uuid,
        snapshots: &[PrivilegeCacheEntry],
    ) -> Result<TokenResponse, AppError> {
        let rpt = self.create_token(identity_id, TokenType::Rpt).await?;
        for snapshot in snapshots {
            self.store
                .create_token_privilege(&TokenPrivilege {
                    token_id: rpt.token_id,
                    privilege_cache_id: snapshot.privilege_cache_id,
                })
                .await?;
        }

        let permissions = snapshots
            .iter()
            .map(|s| Permission {
                resource_id: s.resource_id,
                scopes: s.scopes.clone(),
            })
            .collect();

        Ok(TokenResponse {
            access_token: self.sign(&rpt, Some(permissions))?,
            refresh_token: None,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.lifetime_seconds(TokenType::Rpt),
        })
    }

    // ==================== Status ====================

    #[instrument(skip(self))]
    pub async fn revoke(&self, token_id: Uuid) -> Result<(), AppError> {
        self.store
            .set_token_status_flags(token_id, TokenStatus::REVOKED, TokenStatus::VALID)
            .await?;
        tracing::info!(token_id = %token_id, "Token revoked");
        Ok(())
    }

    /// Flag every token of the identity as logged out.
    #[instrument(skip(self))]
    pub async fn logout(&self, identity_id: Uuid) -> Result<u64, AppError> {
        let updated = self
            .store
            .set_status_flags_for_identity(identity_id, TokenStatus::LOGGED_OUT)
            .await?;
        tracing::info!(identity_id = %identity_id, tokens = updated, "Identity logged out");
        Ok(updated)
    }

    pub async fn mark_stale(&self, identity_id: Uuid) -> Result<u64, AppError> {
        self.store
            .set_status_flags_for_identity(identity_id, TokenStatus::STALE)
            .await
    }

    pub async fn list_tokens(&self, identity_id: Uuid) -> Result<Vec<Token>, AppError> {
        self.store.list_tokens_for_identity(identity_id).await
    }

    pub async fn delete_token(&self, token_id: Uuid) -> Result<(), AppError> {
        self.store.delete_token(token_id).await
    }

    /// Delete tokens that expired more than `retention_hours` ago, then the
    /// stale privilege snapshots no remaining token links to. Returns the
    /// number of tokens deleted.
    #[instrument(skip(self))]
    pub async fn purge_expired(&self, retention_hours: i64) -> Result<u64, AppError> {
        let deleted = self.store.cleanup_expired_tokens(retention_hours).await?;
        if deleted > 0 {
            tracing::info!(deleted, retention_hours, "Purged expired tokens");
        }
        self.cache.purge_stale().await?;
        Ok(deleted)
    }

    // ==================== Account linking ====================

    /// Start linking an external account. Returns the provider URL the user
    /// agent should be sent to.
    #[instrument(skip(self))]
    pub async fn link_url(
        &self,
        identity_id: Uuid,
        for_resource: &str,
        redirect: &str,
    ) -> Result<String, AppError> {
        let provider = self.providers.linking_provider(for_resource)?;

        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let state = hex::encode(bytes);

        let mut pending = self.pending_links.lock().await;
        let now = Utc::now();
        pending.retain(|_, link| link.expires_at > now);
        pending.insert(
            state.clone(),
            PendingLink {
                identity_id,
                provider: for_resource.to_string(),
                redirect: redirect.to_string(),
                expires_at: now + Duration::seconds(LINK_STATE_TTL_SECONDS),
            },
        );

        Ok(provider.auth_code_url(&state))
    }

    /// Finish a link started by [`link_url`](Self::link_url).
    #[instrument(skip(self, code, state))]
    pub async fn link_callback(&self, code: &str, state: &str) -> Result<LinkedAccount, AppError> {
        let link = self
            .pending_links
            .lock()
            .await
            .remove(state)
            .filter(|link| link.expires_at > Utc::now())
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("unknown or expired link state")))?;

        let provider = self.providers.linking_provider(&link.provider)?;
        let provider_token = provider.exchange(code).await?;
        let profile = provider.profile(&provider_token).await?;

        tracing::info!(
            identity_id = %link.identity_id,
            provider = provider.type_name(),
            external_username = %profile.username,
            "External account linked"
        );

        Ok(LinkedAccount {
            identity_id: link.identity_id,
            provider_id: provider.id(),
            profile,
            redirect: link.redirect,
        })
    }

    async fn create_token(&self, identity_id: Uuid, token_type: TokenType) -> Result<Token, AppError> {
        let token = Token::new(identity_id, token_type, self.jwt.lifetime_seconds(token_type));
        self.store.create_token(&token).await?;
        Ok(token)
    }

    fn sign(&self, token: &Token, permissions: Option<Vec<Permission>>) -> Result<String, AppError> {
        self.jwt.sign(token, permissions).map_err(AppError::InternalError)
    }
}
