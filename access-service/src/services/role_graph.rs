//! Role graph management: resource types, roles, resources, group identities
//! and assignments.
//!
//! Every assignment mutation invalidates the affected identity's privilege
//! cache over the resource subtree and flags its tokens stale before
//! returning.

use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::privilege_cache::PrivilegeCacheService;
use crate::models::resource_type::{RESOURCE_TYPE_ORGANIZATION, RESOURCE_TYPE_TEAM};
use crate::models::{Identity, IdentityKind, IdentityRole, Resource, ResourceType, Role, TokenStatus};
use crate::repository::{
    DynStore, IdentityRepository, IdentityRoleRepository, ResourceRepository,
    ResourceTypeRepository, RoleRepository, TokenRepository,
};

#[derive(Clone)]
pub struct RoleGraphService {
    store: DynStore,
    cache: Arc<PrivilegeCacheService>,
}

impl RoleGraphService {
    pub fn new(store: DynStore, cache: Arc<PrivilegeCacheService>) -> Self {
        Self { store, cache }
    }

    /// Create the built-in resource types that are missing. Safe to re-run.
    #[instrument(skip(self))]
    pub async fn ensure_builtin_resource_types(&self) -> Result<Vec<ResourceType>, AppError> {
        let mut types = Vec::new();
        for builtin in ResourceType::builtin() {
            match self.store.find_resource_type_by_name(&builtin.name).await? {
                Some(existing) => types.push(existing),
                None => {
                    self.store.create_resource_type(&builtin).await?;
                    tracing::info!(resource_type = %builtin.name, "Seeded resource type");
                    types.push(builtin);
                }
            }
        }
        Ok(types)
    }

    // ==================== Resource Types ====================

    #[instrument(skip(self, resource_type), fields(name = %resource_type.name))]
    pub async fn create_resource_type(
        &self,
        resource_type: ResourceType,
    ) -> Result<ResourceType, AppError> {
        if let Some(scope) = resource_type
            .default_member_scopes
            .iter()
            .chain(resource_type.invite_scope.iter())
            .find(|s| !resource_type.declares_scope(s))
        {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "scope {} is not declared by resource type {}",
                scope,
                resource_type.name
            )));
        }
        self.store.create_resource_type(&resource_type).await?;
        Ok(resource_type)
    }

    /// Declare an additional scope. Existing scopes are never removed.
    pub async fn add_resource_type_scope(
        &self,
        resource_type_id: Uuid,
        scope: &str,
    ) -> Result<(), AppError> {
        self.store.add_resource_type_scope(resource_type_id, scope).await
    }

    async fn require_resource_type(&self, resource_type_id: Uuid) -> Result<ResourceType, AppError> {
        self.store
            .find_resource_type(resource_type_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("resource type {} not found", resource_type_id))
            })
    }

    pub async fn require_resource_type_by_name(&self, name: &str) -> Result<ResourceType, AppError> {
        self.store
            .find_resource_type_by_name(name)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("resource type {} not found", name)))
    }

    // ==================== Roles ====================

    /// Create a role on a resource type with scopes the type declares.
    #[instrument(skip(self, scopes))]
    pub async fn create_role(
        &self,
        resource_type_id: Uuid,
        name: &str,
        scopes: &[&str],
    ) -> Result<Role, AppError> {
        let resource_type = self.require_resource_type(resource_type_id).await?;
        if let Some(scope) = scopes.iter().find(|s| !resource_type.declares_scope(s)) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "scope {} is not declared by resource type {}",
                scope,
                resource_type.name
            )));
        }

        let role = Role::new(resource_type_id, name);
        self.store.create_role(&role).await?;
        for scope in scopes {
            self.store.add_role_scope(role.role_id, scope).await?;
        }
        Ok(role)
    }

    // ==================== Resources ====================

    /// Persist a resource after checking its type and parent.
    ///
    /// A resource may not become its own ancestor.
    #[instrument(skip(self, resource), fields(resource_id = %resource.resource_id))]
    pub async fn create_resource(&self, resource: Resource) -> Result<Resource, AppError> {
        self.require_resource_type(resource.resource_type_id).await?;

        let mut ancestor = resource.parent_resource_id;
        let mut seen = HashSet::new();
        while let Some(ancestor_id) = ancestor {
            if ancestor_id == resource.resource_id || !seen.insert(ancestor_id) {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "resource {} cannot be its own ancestor",
                    resource.resource_id
                )));
            }
            let parent = self.store.find_resource(ancestor_id).await?.ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("parent resource {} not found", ancestor_id))
            })?;
            ancestor = parent.parent_resource_id;
        }

        self.store.create_resource(&resource).await?;
        Ok(resource)
    }

    // ==================== Identities ====================

    pub async fn create_user(
        &self,
        username: &str,
        email: Option<String>,
    ) -> Result<Identity, AppError> {
        let identity = Identity::new_user(username, email);
        self.store.create_identity(&identity).await?;
        tracing::info!(identity_id = %identity.identity_id, "User identity created");
        Ok(identity)
    }

    /// Create an organization identity backed by a fresh resource.
    pub async fn create_organization(
        &self,
        name: &str,
        owner_id: Option<Uuid>,
    ) -> Result<Identity, AppError> {
        self.create_group(IdentityKind::Organization, RESOURCE_TYPE_ORGANIZATION, name, None, owner_id)
            .await
    }

    /// Create a team identity, optionally nested under an organization or
    /// space resource.
    pub async fn create_team(
        &self,
        name: &str,
        parent_resource_id: Option<Uuid>,
        owner_id: Option<Uuid>,
    ) -> Result<Identity, AppError> {
        self.create_group(IdentityKind::Team, RESOURCE_TYPE_TEAM, name, parent_resource_id, owner_id)
            .await
    }

    async fn create_group(
        &self,
        kind: IdentityKind,
        type_name: &str,
        name: &str,
        parent_resource_id: Option<Uuid>,
        owner_id: Option<Uuid>,
    ) -> Result<Identity, AppError> {
        let resource_type = self.require_resource_type_by_name(type_name).await?;
        let resource = self
            .create_resource(Resource::new(
                resource_type.resource_type_id,
                name,
                parent_resource_id,
                owner_id,
            ))
            .await?;
        let identity = Identity::new_group(kind, resource.resource_id);
        self.store.create_identity(&identity).await?;
        tracing::info!(
            identity_id = %identity.identity_id,
            resource_id = %resource.resource_id,
            kind = kind.as_str(),
            "Group identity created"
        );
        Ok(identity)
    }

    // ==================== Assignments ====================

    /// Assign a role on a resource. Re-assigning an existing role is a no-op.
    #[instrument(skip(self))]
    pub async fn assign_role(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
        role_id: Uuid,
    ) -> Result<(), AppError> {
        let (_, resource) = self.require_pair(identity_id, resource_id).await?;
        let role = self.store.find_role(role_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("role {} not found", role_id))
        })?;
        if role.resource_type_id != resource.resource_type_id {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "role {} is not valid for resource {}",
                role.name,
                resource_id
            )));
        }

        self.store
            .create_identity_role(&IdentityRole::role(identity_id, resource_id, role_id))
            .await?;
        self.after_assignment_change(identity_id, resource_id).await
    }

    /// Make an identity a member of a resource whose type allows membership.
    #[instrument(skip(self))]
    pub async fn add_member(&self, identity_id: Uuid, resource_id: Uuid) -> Result<(), AppError> {
        let (_, resource) = self.require_pair(identity_id, resource_id).await?;
        let resource_type = self.require_resource_type(resource.resource_type_id).await?;
        if !resource_type.allows_membership {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "resource type {} does not allow membership",
                resource_type.name
            )));
        }

        self.store
            .create_identity_role(&IdentityRole::member(identity_id, resource_id))
            .await?;
        self.after_assignment_change(identity_id, resource_id).await
    }

    #[instrument(skip(self))]
    pub async fn revoke_role(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
        role_id: Uuid,
    ) -> Result<(), AppError> {
        self.remove_assignment(identity_id, resource_id, Some(role_id)).await
    }

    #[instrument(skip(self))]
    pub async fn remove_member(&self, identity_id: Uuid, resource_id: Uuid) -> Result<(), AppError> {
        self.remove_assignment(identity_id, resource_id, None).await
    }

    async fn remove_assignment(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
        role_id: Option<Uuid>,
    ) -> Result<(), AppError> {
        if !self
            .store
            .delete_identity_role(identity_id, resource_id, role_id)
            .await?
        {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "assignment of identity {} on resource {} not found",
                identity_id,
                resource_id
            )));
        }
        self.after_assignment_change(identity_id, resource_id).await
    }

    pub async fn list_assignments(&self, resource_id: Uuid) -> Result<Vec<IdentityRole>, AppError> {
        self.store.list_identity_roles_for_resource(resource_id).await
    }

    async fn require_pair(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
    ) -> Result<(Identity, Resource), AppError> {
        let identity = self.store.find_identity(identity_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("identity {} not found", identity_id))
        })?;
        let resource = self.store.find_resource(resource_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("resource {} not found", resource_id))
        })?;
        Ok((identity, resource))
    }

    async fn after_assignment_change(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
    ) -> Result<(), AppError> {
        self.cache.invalidate_subtree(identity_id, resource_id).await?;
        self.store
            .set_status_flags_for_identity(identity_id, TokenStatus::STALE)
            .await?;
        Ok(())
    }
}
