//! Repository interfaces for the role graph, privilege cache, invitations
//! and tokens.
//!
//! Services depend only on these traits. Two engines implement them:
//! [`PgStore`] (PostgreSQL) and [`MemoryStore`] (process-local).

use service_core::axum::async_trait;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    Identity, IdentityRole, Invitation, PrivilegeCacheEntry, Resource, ResourceType, Role,
    Token, TokenPrivilege, TokenStatus,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn create_identity(&self, identity: &Identity) -> Result<(), AppError>;
    async fn find_identity(&self, identity_id: Uuid) -> Result<Option<Identity>, AppError>;
    async fn find_identity_by_username(&self, username: &str)
        -> Result<Option<Identity>, AppError>;
    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, AppError>;
    /// Find the team/organization identity backed by a resource.
    async fn find_identity_by_resource(
        &self,
        resource_id: Uuid,
    ) -> Result<Option<Identity>, AppError>;
}

#[async_trait]
pub trait ResourceTypeRepository: Send + Sync {
    async fn create_resource_type(&self, resource_type: &ResourceType) -> Result<(), AppError>;
    async fn find_resource_type(
        &self,
        resource_type_id: Uuid,
    ) -> Result<Option<ResourceType>, AppError>;
    async fn find_resource_type_by_name(&self, name: &str)
        -> Result<Option<ResourceType>, AppError>;
    /// Append a scope to a resource type's declared scopes. No-op if present.
    async fn add_resource_type_scope(
        &self,
        resource_type_id: Uuid,
        scope: &str,
    ) -> Result<(), AppError>;
}

#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn create_resource(&self, resource: &Resource) -> Result<(), AppError>;
    async fn find_resource(&self, resource_id: Uuid) -> Result<Option<Resource>, AppError>;
    /// IDs of the resource and every descendant of it.
    async fn list_subtree_ids(&self, resource_id: Uuid) -> Result<Vec<Uuid>, AppError>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn create_role(&self, role: &Role) -> Result<(), AppError>;
    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, AppError>;
    async fn find_role_by_name(
        &self,
        resource_type_id: Uuid,
        name: &str,
    ) -> Result<Option<Role>, AppError>;
    async fn add_role_scope(&self, role_id: Uuid, scope: &str) -> Result<(), AppError>;
    async fn list_role_scopes(&self, role_id: Uuid) -> Result<Vec<String>, AppError>;
}

#[async_trait]
pub trait IdentityRoleRepository: Send + Sync {
    /// Create an assignment. Returns `false` if the same (identity, resource,
    /// role) binding already exists.
    async fn create_identity_role(&self, assignment: &IdentityRole) -> Result<bool, AppError>;
    /// Delete the assignment matching the binding. Returns `false` if none.
    async fn delete_identity_role(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
        role_id: Option<Uuid>,
    ) -> Result<bool, AppError>;
    async fn list_identity_roles(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
    ) -> Result<Vec<IdentityRole>, AppError>;
    async fn list_identity_roles_for_resource(
        &self,
        resource_id: Uuid,
    ) -> Result<Vec<IdentityRole>, AppError>;
}

#[async_trait]
pub trait PrivilegeCacheRepository: Send + Sync {
    /// The newest non-stale entry for the pair, if any.
    async fn find_current_privileges(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
    ) -> Result<Option<PrivilegeCacheEntry>, AppError>;
    async fn find_privilege_entry(
        &self,
        privilege_cache_id: Uuid,
    ) -> Result<Option<PrivilegeCacheEntry>, AppError>;
    /// Counter that moves whenever any of the identity's entries may have
    /// been invalidated, including resource-wide invalidations. Every
    /// `mark_privileges_stale*` call and `consume_invitation` advance it.
    async fn invalidation_epoch(&self, identity_id: Uuid) -> Result<i64, AppError>;
    /// Persist a freshly resolved entry, assigning it the next generation and
    /// marking older entries for the pair stale.
    ///
    /// `epoch` is the identity's invalidation epoch read before resolving.
    /// Returns `None` without writing when it has moved since, because the
    /// scopes may predate the invalidation.
    async fn insert_privileges(
        &self,
        entry: PrivilegeCacheEntry,
        epoch: i64,
    ) -> Result<Option<PrivilegeCacheEntry>, AppError>;
    /// Delete stale entries that no token links to.
    async fn delete_unreferenced_stale_privileges(&self) -> Result<u64, AppError>;
    async fn mark_privileges_stale(
        &self,
        identity_id: Uuid,
        resource_ids: &[Uuid],
    ) -> Result<u64, AppError>;
    async fn mark_privileges_stale_for_identity(&self, identity_id: Uuid)
        -> Result<u64, AppError>;
    async fn mark_privileges_stale_for_resources(
        &self,
        resource_ids: &[Uuid],
    ) -> Result<u64, AppError>;
}

#[async_trait]
pub trait InvitationRepository: Send + Sync {
    /// Persist a whole batch atomically.
    async fn create_invitations(&self, invitations: &[Invitation]) -> Result<(), AppError>;
    async fn find_invitation(&self, invitation_id: Uuid) -> Result<Option<Invitation>, AppError>;
    async fn find_invitation_by_code_hash(
        &self,
        accept_code_hash: &str,
    ) -> Result<Option<Invitation>, AppError>;
    async fn list_invitations_for_resource(
        &self,
        resource_id: Uuid,
    ) -> Result<Vec<Invitation>, AppError>;
    async fn list_invitations_for_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Vec<Invitation>, AppError>;
    /// Fails with `NotFound` when no invitation was deleted.
    async fn delete_invitation(&self, invitation_id: Uuid) -> Result<(), AppError>;
    /// Atomically delete the invitation matching the code hash, create the
    /// assignments it describes and mark the invitee's privilege entries over
    /// `subtree` stale. Deletion is the serialization point: a caller that
    /// deletes zero rows gets `NotFound` and grants nothing.
    async fn consume_invitation(
        &self,
        accept_code_hash: &str,
        subtree: &[Uuid],
    ) -> Result<Invitation, AppError>;
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// `NotFound` when the token does not exist.
    async fn check_token_exists(&self, token_id: Uuid) -> Result<(), AppError>;
    async fn load_token(&self, token_id: Uuid) -> Result<Token, AppError>;
    /// `Conflict` on a duplicate token ID.
    async fn create_token(&self, token: &Token) -> Result<(), AppError>;
    /// Persist a token's attributes other than `status`, which only ever
    /// changes through the flag-setting methods.
    async fn save_token(&self, token: &Token) -> Result<(), AppError>;
    /// Bitwise-OR `status` into one token in a single write, unless the token
    /// already carries a flag in `unless`. Returns `false` when `unless`
    /// blocked the update; `NotFound` when the token does not exist.
    async fn set_token_status_flags(
        &self,
        token_id: Uuid,
        status: TokenStatus,
        unless: TokenStatus,
    ) -> Result<bool, AppError>;
    async fn delete_token(&self, token_id: Uuid) -> Result<(), AppError>;
    async fn list_tokens_for_identity(&self, identity_id: Uuid) -> Result<Vec<Token>, AppError>;
    async fn create_token_privilege(&self, privilege: &TokenPrivilege) -> Result<(), AppError>;
    async fn list_token_privileges(
        &self,
        token_id: Uuid,
    ) -> Result<Vec<PrivilegeCacheEntry>, AppError>;
    /// Bitwise-OR `status` into every token of the identity. Never clears.
    async fn set_status_flags_for_identity(
        &self,
        identity_id: Uuid,
        status: TokenStatus,
    ) -> Result<u64, AppError>;
    /// Delete tokens that expired more than `retention_hours` ago.
    async fn cleanup_expired_tokens(&self, retention_hours: i64) -> Result<u64, AppError>;
}

/// Everything the access core needs from persistence.
#[async_trait]
pub trait Store:
    IdentityRepository
    + ResourceTypeRepository
    + ResourceRepository
    + RoleRepository
    + IdentityRoleRepository
    + PrivilegeCacheRepository
    + InvitationRepository
    + TokenRepository
{
    async fn health_check(&self) -> Result<(), AppError>;
}

pub type DynStore = Arc<dyn Store>;
