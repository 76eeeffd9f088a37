//! Identity model - principals that can hold roles or be invited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Kind of principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    User,
    Team,
    Organization,
    Service,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::User => "user",
            IdentityKind::Team => "team",
            IdentityKind::Organization => "organization",
            IdentityKind::Service => "service",
        }
    }
}

impl std::str::FromStr for IdentityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(IdentityKind::User),
            "team" => Ok(IdentityKind::Team),
            "organization" => Ok(IdentityKind::Organization),
            "service" => Ok(IdentityKind::Service),
            _ => Err(format!("Invalid identity kind: {}", s)),
        }
    }
}

/// Identity entity.
///
/// Teams and organizations are backed by a resource (`resource_id`) so that
/// roles and memberships can be assigned on them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Identity {
    pub identity_id: Uuid,
    pub kind_code: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub resource_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl Identity {
    /// Create a new user identity.
    pub fn new_user(username: impl Into<String>, email: Option<String>) -> Self {
        Self {
            identity_id: Uuid::new_v4(),
            kind_code: IdentityKind::User.as_str().to_string(),
            username: Some(username.into()),
            email,
            resource_id: None,
            created_utc: Utc::now(),
        }
    }

    /// Create a team or organization identity backed by `resource_id`.
    pub fn new_group(kind: IdentityKind, resource_id: Uuid) -> Self {
        Self {
            identity_id: Uuid::new_v4(),
            kind_code: kind.as_str().to_string(),
            username: None,
            email: None,
            resource_id: Some(resource_id),
            created_utc: Utc::now(),
        }
    }

    /// Create a service account identity with a pre-assigned ID.
    pub fn new_service(identity_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            identity_id,
            kind_code: IdentityKind::Service.as_str().to_string(),
            username: Some(name.into()),
            email: None,
            resource_id: None,
            created_utc: Utc::now(),
        }
    }

    pub fn kind(&self) -> Option<IdentityKind> {
        self.kind_code.parse().ok()
    }

    pub fn is_user(&self) -> bool {
        self.kind() == Some(IdentityKind::User)
    }
}
