use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use uuid::Uuid;

use crate::providers::GENERIC_PROVIDER_ID;

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub invitation: InvitationConfig,
    pub notification: NotificationServiceConfig,
    pub workspace: WorkspaceServiceConfig,
    pub oauth: OAuthConfig,
    pub github: GitHubConfig,
    pub openshift: OpenShiftConfig,
    pub service_accounts: Vec<ServiceAccountConfig>,
    pub maintenance: MaintenanceConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL URL. Without one, development runs use the in-memory store.
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub private_key_path: String,
    pub public_key_path: String,
    pub issuer: String,
    pub access_token_expiry_seconds: i64,
    pub refresh_token_expiry_seconds: i64,
    pub pat_expiry_seconds: i64,
    pub rpt_expiry_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvitationConfig {
    /// Public base URL the accept link is built from.
    pub accept_url_base: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationServiceConfig {
    pub url: String,
    pub enabled: bool,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceServiceConfig {
    pub url: String,
    pub enabled: bool,
    pub timeout_seconds: u64,
}

/// Generic OAuth2/OIDC login provider.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub provider_id: Uuid,
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub redirect_url: String,
    pub scopes: Vec<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub api_url: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenShiftConfig {
    /// Fixed per cluster; persisted on linked external tokens.
    pub token_provider_id: Uuid,
    pub cluster_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountConfig {
    pub id: Uuid,
    pub name: String,
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    pub token_retention_hours: i64,
    pub purge_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

impl AccessConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        // Secrets and endpoints must be set explicitly in production.
        let is_prod = environment == Environment::Prod;

        let notification_url = env::var("NOTIFICATION_SERVICE_URL").ok();
        let workspace_url = env::var("WORKSPACE_SERVICE_URL").ok();

        let config = AccessConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("access-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: if is_prod {
                    Some(get_env("DATABASE_URL", None, true)?)
                } else {
                    env::var("DATABASE_URL").ok()
                },
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1")?,
            },
            jwt: JwtConfig {
                private_key_path: get_env("JWT_PRIVATE_KEY_PATH", None, is_prod)?,
                public_key_path: get_env("JWT_PUBLIC_KEY_PATH", None, is_prod)?,
                issuer: get_env("JWT_ISSUER", Some("access-service"), false)?,
                access_token_expiry_seconds: parse_env("JWT_ACCESS_TOKEN_EXPIRY_SECONDS", "2592000")?,
                refresh_token_expiry_seconds: parse_env(
                    "JWT_REFRESH_TOKEN_EXPIRY_SECONDS",
                    "2592000",
                )?,
                pat_expiry_seconds: parse_env("JWT_PAT_EXPIRY_SECONDS", "2592000")?,
                rpt_expiry_seconds: parse_env("JWT_RPT_EXPIRY_SECONDS", "2592000")?,
            },
            invitation: InvitationConfig {
                accept_url_base: get_env(
                    "INVITATION_ACCEPT_URL_BASE",
                    Some("http://localhost:8080"),
                    is_prod,
                )?,
            },
            notification: NotificationServiceConfig {
                enabled: notification_url.is_some(),
                url: notification_url.unwrap_or_default(),
                timeout_seconds: parse_env("NOTIFICATION_SERVICE_TIMEOUT_SECONDS", "10")?,
            },
            workspace: WorkspaceServiceConfig {
                enabled: workspace_url.is_some(),
                url: workspace_url.unwrap_or_default(),
                timeout_seconds: parse_env("WORKSPACE_SERVICE_TIMEOUT_SECONDS", "10")?,
            },
            oauth: OAuthConfig {
                provider_id: parse_env("OAUTH_PROVIDER_ID", GENERIC_PROVIDER_ID)?,
                client_id: get_env("OAUTH_CLIENT_ID", Some("access-service"), is_prod)?,
                client_secret: get_env("OAUTH_CLIENT_SECRET", Some(""), is_prod)?,
                auth_url: get_env(
                    "OAUTH_AUTH_URL",
                    Some("http://localhost:8180/auth/realms/access/protocol/openid-connect/auth"),
                    is_prod,
                )?,
                token_url: get_env(
                    "OAUTH_TOKEN_URL",
                    Some("http://localhost:8180/auth/realms/access/protocol/openid-connect/token"),
                    is_prod,
                )?,
                profile_url: get_env(
                    "OAUTH_PROFILE_URL",
                    Some("http://localhost:8180/auth/realms/access/protocol/openid-connect/userinfo"),
                    is_prod,
                )?,
                redirect_url: get_env(
                    "OAUTH_REDIRECT_URL",
                    Some("http://localhost:8080/api/token/callback"),
                    is_prod,
                )?,
                scopes: split_list(&get_env("OAUTH_SCOPES", Some("openid,profile,email"), false)?),
                timeout_seconds: parse_env("OAUTH_TIMEOUT_SECONDS", "10")?,
            },
            github: GitHubConfig {
                client_id: get_env("GITHUB_CLIENT_ID", Some(""), is_prod)?,
                client_secret: get_env("GITHUB_CLIENT_SECRET", Some(""), is_prod)?,
                auth_url: get_env(
                    "GITHUB_AUTH_URL",
                    Some("https://github.com/login/oauth/authorize"),
                    false,
                )?,
                token_url: get_env(
                    "GITHUB_TOKEN_URL",
                    Some("https://github.com/login/oauth/access_token"),
                    false,
                )?,
                api_url: get_env("GITHUB_API_URL", Some("https://api.github.com"), false)?,
                scopes: split_list(&get_env(
                    "GITHUB_SCOPES",
                    Some("admin:repo_hook,read:org,repo,user,gist"),
                    false,
                )?),
            },
            openshift: OpenShiftConfig {
                token_provider_id: parse_env(
                    "OPENSHIFT_TOKEN_PROVIDER_ID",
                    "1b3bd2c5-b1a7-4b32-9a3b-8b5e7d5fbd2e",
                )?,
                cluster_url: get_env(
                    "OPENSHIFT_CLUSTER_URL",
                    Some("https://api.openshift.example.com/"),
                    is_prod,
                )?,
                client_id: get_env("OPENSHIFT_CLIENT_ID", Some("openshift-io"), is_prod)?,
                client_secret: get_env("OPENSHIFT_CLIENT_SECRET", Some(""), is_prod)?,
                scopes: split_list(&get_env("OPENSHIFT_SCOPES", Some("user:full"), false)?),
            },
            service_accounts: parse_service_accounts(&get_env(
                "SERVICE_ACCOUNTS",
                Some(""),
                false,
            )?)?,
            maintenance: MaintenanceConfig {
                token_retention_hours: parse_env("TOKEN_RETENTION_HOURS", "24")?,
                purge_interval_seconds: parse_env("TOKEN_PURGE_INTERVAL_SECONDS", "3600")?,
            },
            security: SecurityConfig {
                allowed_origins: split_list(&get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        for (key, value) in [
            ("JWT_ACCESS_TOKEN_EXPIRY_SECONDS", self.jwt.access_token_expiry_seconds),
            ("JWT_REFRESH_TOKEN_EXPIRY_SECONDS", self.jwt.refresh_token_expiry_seconds),
            ("JWT_PAT_EXPIRY_SECONDS", self.jwt.pat_expiry_seconds),
            ("JWT_RPT_EXPIRY_SECONDS", self.jwt.rpt_expiry_seconds),
            ("TOKEN_RETENTION_HOURS", self.maintenance.token_retention_hours),
        ] {
            if value <= 0 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} must be positive",
                    key
                )));
            }
        }

        if self.maintenance.purge_interval_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TOKEN_PURGE_INTERVAL_SECONDS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.service_accounts.iter().any(|sa| sa.secret.len() < 16) {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Service account secrets must be at least 16 characters in production"
                )));
            }
        }

        Ok(())
    }

    pub fn find_service_account(&self, id: Uuid) -> Option<&ServiceAccountConfig> {
        self.service_accounts.iter().find(|sa| sa.id == id)
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), false)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `id:name:secret` entries separated by commas.
fn parse_service_accounts(value: &str) -> Result<Vec<ServiceAccountConfig>, AppError> {
    split_list(value)
        .into_iter()
        .map(|entry| {
            let mut parts = entry.splitn(3, ':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(id), Some(name), Some(secret)) => Ok(ServiceAccountConfig {
                    id: id.parse().map_err(|e| {
                        AppError::ConfigError(anyhow::anyhow!(
                            "SERVICE_ACCOUNTS: invalid ID {}: {}",
                            id,
                            e
                        ))
                    })?,
                    name: name.to_string(),
                    secret: secret.to_string(),
                }),
                _ => Err(AppError::ConfigError(anyhow::anyhow!(
                    "SERVICE_ACCOUNTS entries must be id:name:secret"
                ))),
            }
        })
        .collect()
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
