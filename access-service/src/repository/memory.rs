//! Process-local store backed by `tokio::sync::RwLock`.
//!
//! Used by tests and by development runs without a database. Every
//! multi-step operation runs under a single write guard, which gives the same
//! atomicity the Postgres engine gets from transactions.

use chrono::{Duration, Utc};
use service_core::axum::async_trait;
use service_core::error::AppError;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    IdentityRepository, IdentityRoleRepository, InvitationRepository, PrivilegeCacheRepository,
    ResourceRepository, ResourceTypeRepository, RoleRepository, Store, TokenRepository,
};
use crate::models::{
    Identity, IdentityRole, Invitation, PrivilegeCacheEntry, Resource, ResourceType, Role,
    Token, TokenPrivilege, TokenStatus,
};

#[derive(Default)]
struct Inner {
    identities: HashMap<Uuid, Identity>,
    resource_types: HashMap<Uuid, ResourceType>,
    resources: HashMap<Uuid, Resource>,
    roles: HashMap<Uuid, Role>,
    role_scopes: HashMap<Uuid, Vec<String>>,
    identity_roles: Vec<IdentityRole>,
    privileges: HashMap<Uuid, PrivilegeCacheEntry>,
    generation: i64,
    invalidation_epochs: HashMap<Uuid, i64>,
    global_invalidation_epoch: i64,
    invitations: HashMap<Uuid, Invitation>,
    tokens: HashMap<Uuid, Token>,
    token_privileges: Vec<TokenPrivilege>,
}

impl Inner {
    fn insert_assignment(&mut self, assignment: &IdentityRole) -> bool {
        if self.identity_roles.iter().any(|a| a.same_binding(assignment)) {
            return false;
        }
        self.identity_roles.push(assignment.clone());
        true
    }

    fn invalidation_epoch(&self, identity_id: Uuid) -> i64 {
        self.global_invalidation_epoch
            + self.invalidation_epochs.get(&identity_id).copied().unwrap_or(0)
    }

    fn advance_epoch(&mut self, identity_id: Uuid) {
        *self.invalidation_epochs.entry(identity_id).or_insert(0) += 1;
    }

    fn mark_stale<F>(&mut self, matches: F) -> u64
    where
        F: Fn(&PrivilegeCacheEntry) -> bool,
    {
        let mut count = 0;
        for entry in self.privileges.values_mut() {
            if !entry.stale && matches(entry) {
                entry.stale = true;
                count += 1;
            }
        }
        count
    }
}

/// In-memory implementation of [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a token's expiry. Lets tests age tokens without waiting.
    pub async fn set_token_expiry(
        &self,
        token_id: Uuid,
        expiry_time: chrono::DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        let token = inner
            .tokens
            .get_mut(&token_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("token {} not found", token_id)))?;
        token.expiry_time = expiry_time;
        Ok(())
    }
}

fn conflict(entity: &str, id: impl std::fmt::Display) -> AppError {
    AppError::Conflict(anyhow::anyhow!("{} with ID {} already exists", entity, id))
}

#[async_trait]
impl IdentityRepository for MemoryStore {
    async fn create_identity(&self, identity: &Identity) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if inner.identities.contains_key(&identity.identity_id) {
            return Err(conflict("identity", identity.identity_id));
        }
        if let Some(username) = &identity.username {
            if inner
                .identities
                .values()
                .any(|i| i.username.as_deref() == Some(username.as_str()))
            {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "username {} is already taken",
                    username
                )));
            }
        }
        inner.identities.insert(identity.identity_id, identity.clone());
        Ok(())
    }

    async fn find_identity(&self, identity_id: Uuid) -> Result<Option<Identity>, AppError> {
        Ok(self.inner.read().await.identities.get(&identity_id).cloned())
    }

    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .identities
            .values()
            .find(|i| i.username.as_deref() == Some(username))
            .cloned())
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .identities
            .values()
            .find(|i| {
                i.email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
            .cloned())
    }

    async fn find_identity_by_resource(
        &self,
        resource_id: Uuid,
    ) -> Result<Option<Identity>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .identities
            .values()
            .find(|i| i.resource_id == Some(resource_id))
            .cloned())
    }
}

#[async_trait]
impl ResourceTypeRepository for MemoryStore {
    async fn create_resource_type(&self, resource_type: &ResourceType) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if inner.resource_types.contains_key(&resource_type.resource_type_id)
            || inner
                .resource_types
                .values()
                .any(|t| t.name == resource_type.name)
        {
            return Err(conflict("resource type", &resource_type.name));
        }
        inner
            .resource_types
            .insert(resource_type.resource_type_id, resource_type.clone());
        Ok(())
    }

    async fn find_resource_type(
        &self,
        resource_type_id: Uuid,
    ) -> Result<Option<ResourceType>, AppError> {
        Ok(self
            .inner
            .read()
            .await
            .resource_types
            .get(&resource_type_id)
            .cloned())
    }

    async fn find_resource_type_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ResourceType>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner.resource_types.values().find(|t| t.name == name).cloned())
    }

    async fn add_resource_type_scope(
        &self,
        resource_type_id: Uuid,
        scope: &str,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        let resource_type = inner.resource_types.get_mut(&resource_type_id).ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("resource type {} not found", resource_type_id))
        })?;
        if !resource_type.declares_scope(scope) {
            resource_type.scopes.push(scope.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceRepository for MemoryStore {
    async fn create_resource(&self, resource: &Resource) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if inner.resources.contains_key(&resource.resource_id) {
            return Err(conflict("resource", resource.resource_id));
        }
        inner.resources.insert(resource.resource_id, resource.clone());
        Ok(())
    }

    async fn find_resource(&self, resource_id: Uuid) -> Result<Option<Resource>, AppError> {
        Ok(self.inner.read().await.resources.get(&resource_id).cloned())
    }

    async fn list_subtree_ids(&self, resource_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        let inner = self.inner.read().await;
        let mut result = vec![resource_id];
        let mut seen = HashSet::from([resource_id]);
        let mut queue = VecDeque::from([resource_id]);
        while let Some(current) = queue.pop_front() {
            for child in inner
                .resources
                .values()
                .filter(|r| r.parent_resource_id == Some(current))
            {
                if seen.insert(child.resource_id) {
                    result.push(child.resource_id);
                    queue.push_back(child.resource_id);
                }
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl RoleRepository for MemoryStore {
    async fn create_role(&self, role: &Role) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if inner.roles.contains_key(&role.role_id)
            || inner
                .roles
                .values()
                .any(|r| r.resource_type_id == role.resource_type_id && r.name == role.name)
        {
            return Err(conflict("role", &role.name));
        }
        inner.roles.insert(role.role_id, role.clone());
        Ok(())
    }

    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, AppError> {
        Ok(self.inner.read().await.roles.get(&role_id).cloned())
    }

    async fn find_role_by_name(
        &self,
        resource_type_id: Uuid,
        name: &str,
    ) -> Result<Option<Role>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .roles
            .values()
            .find(|r| r.resource_type_id == resource_type_id && r.name == name)
            .cloned())
    }

    async fn add_role_scope(&self, role_id: Uuid, scope: &str) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if !inner.roles.contains_key(&role_id) {
            return Err(AppError::NotFound(anyhow::anyhow!("role {} not found", role_id)));
        }
        let scopes = inner.role_scopes.entry(role_id).or_default();
        if !scopes.iter().any(|s| s == scope) {
            scopes.push(scope.to_string());
        }
        Ok(())
    }

    async fn list_role_scopes(&self, role_id: Uuid) -> Result<Vec<String>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner.role_scopes.get(&role_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl IdentityRoleRepository for MemoryStore {
    async fn create_identity_role(&self, assignment: &IdentityRole) -> Result<bool, AppError> {
        Ok(self.inner.write().await.insert_assignment(assignment))
    }

    async fn delete_identity_role(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
        role_id: Option<Uuid>,
    ) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        let before = inner.identity_roles.len();
        inner.identity_roles.retain(|a| {
            !(a.identity_id == identity_id && a.resource_id == resource_id && a.role_id == role_id)
        });
        Ok(inner.identity_roles.len() != before)
    }

    async fn list_identity_roles(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
    ) -> Result<Vec<IdentityRole>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .identity_roles
            .iter()
            .filter(|a| a.identity_id == identity_id && a.resource_id == resource_id)
            .cloned()
            .collect())
    }

    async fn list_identity_roles_for_resource(
        &self,
        resource_id: Uuid,
    ) -> Result<Vec<IdentityRole>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .identity_roles
            .iter()
            .filter(|a| a.resource_id == resource_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PrivilegeCacheRepository for MemoryStore {
    async fn find_current_privileges(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
    ) -> Result<Option<PrivilegeCacheEntry>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .privileges
            .values()
            .filter(|p| p.identity_id == identity_id && p.resource_id == resource_id && !p.stale)
            .max_by_key(|p| p.generation)
            .cloned())
    }

    async fn find_privilege_entry(
        &self,
        privilege_cache_id: Uuid,
    ) -> Result<Option<PrivilegeCacheEntry>, AppError> {
        Ok(self
            .inner
            .read()
            .await
            .privileges
            .get(&privilege_cache_id)
            .cloned())
    }

    async fn invalidation_epoch(&self, identity_id: Uuid) -> Result<i64, AppError> {
        Ok(self.inner.read().await.invalidation_epoch(identity_id))
    }

    async fn insert_privileges(
        &self,
        mut entry: PrivilegeCacheEntry,
        epoch: i64,
    ) -> Result<Option<PrivilegeCacheEntry>, AppError> {
        let mut inner = self.inner.write().await;
        let (identity_id, resource_id) = (entry.identity_id, entry.resource_id);
        if inner.invalidation_epoch(identity_id) != epoch {
            return Ok(None);
        }
        inner.mark_stale(|p| p.identity_id == identity_id && p.resource_id == resource_id);
        inner.generation += 1;
        entry.generation = inner.generation;
        entry.stale = false;
        inner
            .privileges
            .insert(entry.privilege_cache_id, entry.clone());
        Ok(Some(entry))
    }

    async fn delete_unreferenced_stale_privileges(&self) -> Result<u64, AppError> {
        let mut inner = self.inner.write().await;
        let linked: HashSet<Uuid> = inner
            .token_privileges
            .iter()
            .map(|p| p.privilege_cache_id)
            .collect();
        let before = inner.privileges.len();
        inner
            .privileges
            .retain(|id, entry| !entry.stale || linked.contains(id));
        Ok((before - inner.privileges.len()) as u64)
    }

    async fn mark_privileges_stale(
        &self,
        identity_id: Uuid,
        resource_ids: &[Uuid],
    ) -> Result<u64, AppError> {
        let mut inner = self.inner.write().await;
        inner.advance_epoch(identity_id);
        Ok(inner.mark_stale(|p| p.identity_id == identity_id && resource_ids.contains(&p.resource_id)))
    }

    async fn mark_privileges_stale_for_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<u64, AppError> {
        let mut inner = self.inner.write().await;
        inner.advance_epoch(identity_id);
        Ok(inner.mark_stale(|p| p.identity_id == identity_id))
    }

    async fn mark_privileges_stale_for_resources(
        &self,
        resource_ids: &[Uuid],
    ) -> Result<u64, AppError> {
        let mut inner = self.inner.write().await;
        inner.global_invalidation_epoch += 1;
        Ok(inner.mark_stale(|p| resource_ids.contains(&p.resource_id)))
    }
}

#[async_trait]
impl InvitationRepository for MemoryStore {
    async fn create_invitations(&self, invitations: &[Invitation]) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        for invitation in invitations {
            if inner.invitations.contains_key(&invitation.invitation_id) {
                return Err(conflict("invitation", invitation.invitation_id));
            }
        }
        for invitation in invitations {
            inner
                .invitations
                .insert(invitation.invitation_id, invitation.clone());
        }
        Ok(())
    }

    async fn find_invitation(&self, invitation_id: Uuid) -> Result<Option<Invitation>, AppError> {
        Ok(self.inner.read().await.invitations.get(&invitation_id).cloned())
    }

    async fn find_invitation_by_code_hash(
        &self,
        accept_code_hash: &str,
    ) -> Result<Option<Invitation>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .invitations
            .values()
            .find(|i| i.accept_code_hash == accept_code_hash)
            .cloned())
    }

    async fn list_invitations_for_resource(
        &self,
        resource_id: Uuid,
    ) -> Result<Vec<Invitation>, AppError> {
        let inner = self.inner.read().await;
        let mut invitations: Vec<Invitation> = inner
            .invitations
            .values()
            .filter(|i| i.resource_id == resource_id)
            .cloned()
            .collect();
        invitations.sort_by_key(|i| i.created_utc);
        Ok(invitations)
    }

    async fn list_invitations_for_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Vec<Invitation>, AppError> {
        let inner = self.inner.read().await;
        let mut invitations: Vec<Invitation> = inner
            .invitations
            .values()
            .filter(|i| i.identity_id == identity_id)
            .cloned()
            .collect();
        invitations.sort_by_key(|i| i.created_utc);
        Ok(invitations)
    }

    async fn delete_invitation(&self, invitation_id: Uuid) -> Result<(), AppError> {
        self.inner
            .write()
            .await
            .invitations
            .remove(&invitation_id)
            .map(|_| ())
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("invitation {} not found", invitation_id))
            })
    }

    async fn consume_invitation(
        &self,
        accept_code_hash: &str,
        subtree: &[Uuid],
    ) -> Result<Invitation, AppError> {
        let mut inner = self.inner.write().await;
        let invitation_id = inner
            .invitations
            .values()
            .find(|i| i.accept_code_hash == accept_code_hash)
            .map(|i| i.invitation_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("invitation not found")))?;
        let invitation = inner
            .invitations
            .remove(&invitation_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("invitation not found")))?;

        if invitation.member {
            inner.insert_assignment(&IdentityRole::member(
                invitation.identity_id,
                invitation.resource_id,
            ));
        }
        for role_id in &invitation.role_ids {
            inner.insert_assignment(&IdentityRole::role(
                invitation.identity_id,
                invitation.resource_id,
                *role_id,
            ));
        }
        let identity_id = invitation.identity_id;
        inner.advance_epoch(identity_id);
        inner.mark_stale(|p| p.identity_id == identity_id && subtree.contains(&p.resource_id));

        Ok(invitation)
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn check_token_exists(&self, token_id: Uuid) -> Result<(), AppError> {
        if self.inner.read().await.tokens.contains_key(&token_id) {
            Ok(())
        } else {
            Err(AppError::NotFound(anyhow::anyhow!("token {} not found", token_id)))
        }
    }

    async fn load_token(&self, token_id: Uuid) -> Result<Token, AppError> {
        self.inner
            .read()
            .await
            .tokens
            .get(&token_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("token {} not found", token_id)))
    }

    async fn create_token(&self, token: &Token) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if inner.tokens.contains_key(&token.token_id) {
            return Err(conflict("token", token.token_id));
        }
        inner.tokens.insert(token.token_id, token.clone());
        Ok(())
    }

    async fn save_token(&self, token: &Token) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        match inner.tokens.get_mut(&token.token_id) {
            Some(existing) => {
                let status = existing.status;
                *existing = Token {
                    status,
                    ..token.clone()
                };
                Ok(())
            }
            None => Err(AppError::NotFound(anyhow::anyhow!(
                "token {} not found",
                token.token_id
            ))),
        }
    }

    async fn set_token_status_flags(
        &self,
        token_id: Uuid,
        status: TokenStatus,
        unless: TokenStatus,
    ) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        let token = inner
            .tokens
            .get_mut(&token_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("token {} not found", token_id)))?;
        if token.status().intersects(unless) {
            return Ok(false);
        }
        token.status |= status.bits();
        Ok(true)
    }

    async fn delete_token(&self, token_id: Uuid) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if inner.tokens.remove(&token_id).is_none() {
            return Err(AppError::NotFound(anyhow::anyhow!("token {} not found", token_id)));
        }
        inner.token_privileges.retain(|p| p.token_id != token_id);
        Ok(())
    }

    async fn list_tokens_for_identity(&self, identity_id: Uuid) -> Result<Vec<Token>, AppError> {
        let inner = self.inner.read().await;
        let mut tokens: Vec<Token> = inner
            .tokens
            .values()
            .filter(|t| t.identity_id == identity_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.created_utc);
        Ok(tokens)
    }

    async fn create_token_privilege(&self, privilege: &TokenPrivilege) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if !inner.tokens.contains_key(&privilege.token_id) {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "token {} not found",
                privilege.token_id
            )));
        }
        if inner.token_privileges.contains(privilege) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "token privilege already exists"
            )));
        }
        inner.token_privileges.push(privilege.clone());
        Ok(())
    }

    async fn list_token_privileges(
        &self,
        token_id: Uuid,
    ) -> Result<Vec<PrivilegeCacheEntry>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .token_privileges
            .iter()
            .filter(|p| p.token_id == token_id)
            .filter_map(|p| inner.privileges.get(&p.privilege_cache_id).cloned())
            .collect())
    }

    async fn set_status_flags_for_identity(
        &self,
        identity_id: Uuid,
        status: TokenStatus,
    ) -> Result<u64, AppError> {
        let mut inner = self.inner.write().await;
        let mut count = 0;
        for token in inner
            .tokens
            .values_mut()
            .filter(|t| t.identity_id == identity_id)
        {
            token.status |= status.bits();
            count += 1;
        }
        Ok(count)
    }

    async fn cleanup_expired_tokens(&self, retention_hours: i64) -> Result<u64, AppError> {
        let mut inner = self.inner.write().await;
        let cutoff = Utc::now() - Duration::hours(retention_hours);
        let expired: HashSet<Uuid> = inner
            .tokens
            .values()
            .filter(|t| t.expiry_time < cutoff)
            .map(|t| t.token_id)
            .collect();
        inner.tokens.retain(|id, _| !expired.contains(id));
        inner
            .token_privileges
            .retain(|p| !expired.contains(&p.token_id));
        Ok(expired.len() as u64)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenType;

    #[tokio::test]
    async fn test_insert_privileges_bumps_generation_and_stales_previous() {
        let store = MemoryStore::new();
        let (identity, resource) = (Uuid::new_v4(), Uuid::new_v4());

        let first = store
            .insert_privileges(PrivilegeCacheEntry::new(identity, resource, vec![]), 0)
            .await
            .unwrap()
            .unwrap();
        let second = store
            .insert_privileges(PrivilegeCacheEntry::new(identity, resource, vec!["view".into()]), 0)
            .await
            .unwrap()
            .unwrap();

        assert!(second.generation > first.generation);
        let current = store
            .find_current_privileges(identity, resource)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.privilege_cache_id, second.privilege_cache_id);
        let old = store
            .find_privilege_entry(first.privilege_cache_id)
            .await
            .unwrap()
            .unwrap();
        assert!(old.stale);
    }

    #[tokio::test]
    async fn test_insert_is_refused_after_an_invalidation_during_resolve() {
        let store = MemoryStore::new();
        let (identity, resource) = (Uuid::new_v4(), Uuid::new_v4());
        let epoch = store.invalidation_epoch(identity).await.unwrap();

        store.mark_privileges_stale(identity, &[resource]).await.unwrap();
        let refused = store
            .insert_privileges(PrivilegeCacheEntry::new(identity, resource, vec![]), epoch)
            .await
            .unwrap();

        assert!(refused.is_none());
        assert!(store
            .find_current_privileges(identity, resource)
            .await
            .unwrap()
            .is_none());

        let epoch = store.invalidation_epoch(identity).await.unwrap();
        store.mark_privileges_stale_for_resources(&[resource]).await.unwrap();
        assert!(store.invalidation_epoch(identity).await.unwrap() > epoch);
    }

    #[tokio::test]
    async fn test_status_flags_are_ored_unless_blocked() {
        let store = MemoryStore::new();
        let token = Token::new(Uuid::new_v4(), TokenType::Refresh, 60);
        store.create_token(&token).await.unwrap();

        assert!(store
            .set_token_status_flags(token.token_id, TokenStatus::STALE, TokenStatus::VALID)
            .await
            .unwrap());
        assert!(store
            .set_token_status_flags(token.token_id, TokenStatus::REVOKED, TokenStatus::REJECTED)
            .await
            .unwrap());
        assert!(!store
            .set_token_status_flags(token.token_id, TokenStatus::REVOKED, TokenStatus::REJECTED)
            .await
            .unwrap());

        let stored = store.load_token(token.token_id).await.unwrap();
        assert_eq!(stored.status(), TokenStatus::STALE | TokenStatus::REVOKED);
        assert!(matches!(
            store
                .set_token_status_flags(Uuid::new_v4(), TokenStatus::REVOKED, TokenStatus::VALID)
                .await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_assignment_is_ignored() {
        let store = MemoryStore::new();
        let assignment = IdentityRole::member(Uuid::new_v4(), Uuid::new_v4());

        assert!(store.create_identity_role(&assignment).await.unwrap());
        let duplicate = IdentityRole::member(assignment.identity_id, assignment.resource_id);
        assert!(!store.create_identity_role(&duplicate).await.unwrap());
        assert_eq!(
            store
                .list_identity_roles(assignment.identity_id, assignment.resource_id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_create_token_conflict() {
        let store = MemoryStore::new();
        let token = Token::new(Uuid::new_v4(), TokenType::Access, 60);
        store.create_token(&token).await.unwrap();
        let err = store.create_token(&token).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_subtree_walks_all_descendants() {
        let store = MemoryStore::new();
        let type_id = Uuid::new_v4();
        let root = Resource::new(type_id, "root", None, None);
        let child = Resource::new(type_id, "child", Some(root.resource_id), None);
        let grandchild = Resource::new(type_id, "grandchild", Some(child.resource_id), None);
        let other = Resource::new(type_id, "other", None, None);
        for r in [&root, &child, &grandchild, &other] {
            store.create_resource(r).await.unwrap();
        }

        let subtree = store.list_subtree_ids(root.resource_id).await.unwrap();
        assert_eq!(subtree.len(), 3);
        assert_eq!(subtree[0], root.resource_id);
        assert!(subtree.contains(&grandchild.resource_id));
        assert!(!subtree.contains(&other.resource_id));
    }
}
