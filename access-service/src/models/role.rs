//! Role model - named scope bundles and their assignments to identities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Role entity, defined for exactly one resource type.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub role_id: Uuid,
    pub resource_type_id: Uuid,
    pub name: String,
    pub created_utc: DateTime<Utc>,
}

impl Role {
    pub fn new(resource_type_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            resource_type_id,
            name: name.into(),
            created_utc: Utc::now(),
        }
    }
}

/// Binding of an identity to a role on a resource.
///
/// A `role_id` of `None` is a plain "member" assignment.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IdentityRole {
    pub identity_role_id: Uuid,
    pub identity_id: Uuid,
    pub resource_id: Uuid,
    pub role_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl IdentityRole {
    /// Assign a role on a resource.
    pub fn role(identity_id: Uuid, resource_id: Uuid, role_id: Uuid) -> Self {
        Self {
            identity_role_id: Uuid::new_v4(),
            identity_id,
            resource_id,
            role_id: Some(role_id),
            created_utc: Utc::now(),
        }
    }

    /// Make an identity a member of a resource.
    pub fn member(identity_id: Uuid, resource_id: Uuid) -> Self {
        Self {
            identity_role_id: Uuid::new_v4(),
            identity_id,
            resource_id,
            role_id: None,
            created_utc: Utc::now(),
        }
    }

    pub fn is_member(&self) -> bool {
        self.role_id.is_none()
    }

    /// Whether both assignments bind the same (identity, resource, role) triple.
    pub fn same_binding(&self, other: &IdentityRole) -> bool {
        self.identity_id == other.identity_id
            && self.resource_id == other.resource_id
            && self.role_id == other.role_id
    }
}
