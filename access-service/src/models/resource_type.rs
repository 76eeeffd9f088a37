//! Resource type model - categories of protectable resources and their scopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const RESOURCE_TYPE_ORGANIZATION: &str = "identity/organization";
pub const RESOURCE_TYPE_TEAM: &str = "identity/team";
pub const RESOURCE_TYPE_SPACE: &str = "openshift.io/resource/space";

pub const VIEW_SCOPE: &str = "view";
pub const CONTRIBUTE_SCOPE: &str = "contribute";
pub const MANAGE_SCOPE: &str = "manage";
pub const MANAGE_ORGANIZATION_MEMBERS_SCOPE: &str = "manage-organization-members";
pub const MANAGE_TEAM_MEMBERS_SCOPE: &str = "manage-team-members";

/// Resource type entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResourceType {
    pub resource_type_id: Uuid,
    pub name: String,
    /// Declared scope names. Append-only once roles reference them.
    pub scopes: Vec<String>,
    /// Scopes granted by a bare "member" assignment.
    pub default_member_scopes: Vec<String>,
    pub allows_membership: bool,
    /// Whether assignments on resources of this type apply to descendants.
    pub propagates: bool,
    /// Scope an issuer must hold to invite (or rescind invitations) on
    /// resources of this type. `None` disables invitations.
    pub invite_scope: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl ResourceType {
    /// Create a new resource type with no scopes and propagation enabled.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            resource_type_id: Uuid::new_v4(),
            name: name.into(),
            scopes: Vec::new(),
            default_member_scopes: Vec::new(),
            allows_membership: false,
            propagates: true,
            invite_scope: None,
            created_utc: Utc::now(),
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_membership<I, S>(mut self, default_member_scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allows_membership = true;
        self.default_member_scopes = default_member_scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_invite_scope(mut self, scope: impl Into<String>) -> Self {
        self.invite_scope = Some(scope.into());
        self
    }

    pub fn without_propagation(mut self) -> Self {
        self.propagates = false;
        self
    }

    pub fn declares_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn is_space(&self) -> bool {
        self.name == RESOURCE_TYPE_SPACE
    }

    /// The resource types every deployment starts with.
    pub fn builtin() -> Vec<ResourceType> {
        vec![
            ResourceType::new(RESOURCE_TYPE_ORGANIZATION)
                .with_scopes([VIEW_SCOPE, MANAGE_ORGANIZATION_MEMBERS_SCOPE])
                .with_membership([VIEW_SCOPE])
                .with_invite_scope(MANAGE_ORGANIZATION_MEMBERS_SCOPE),
            ResourceType::new(RESOURCE_TYPE_TEAM)
                .with_scopes([VIEW_SCOPE, MANAGE_TEAM_MEMBERS_SCOPE])
                .with_membership([VIEW_SCOPE])
                .with_invite_scope(MANAGE_TEAM_MEMBERS_SCOPE),
            ResourceType::new(RESOURCE_TYPE_SPACE)
                .with_scopes([VIEW_SCOPE, CONTRIBUTE_SCOPE, MANAGE_SCOPE])
                .with_invite_scope(MANAGE_SCOPE),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_types() {
        let types = ResourceType::builtin();
        assert_eq!(types.len(), 3);

        let space = types.iter().find(|t| t.is_space()).unwrap();
        assert!(!space.allows_membership);
        assert_eq!(space.invite_scope.as_deref(), Some(MANAGE_SCOPE));

        let team = types.iter().find(|t| t.name == RESOURCE_TYPE_TEAM).unwrap();
        assert!(team.allows_membership);
        assert_eq!(team.default_member_scopes, vec![VIEW_SCOPE.to_string()]);
        assert!(team.declares_scope(MANAGE_TEAM_MEMBERS_SCOPE));
    }
}
