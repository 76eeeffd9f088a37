//! Privilege cache over the authorization resolver.
//!
//! Entries live in the store so every process sees the same stale flags. A
//! fill reads the identity's invalidation epoch before resolving and the
//! store refuses the insert if the epoch moved, so scopes resolved before a
//! mutation are never persisted after its invalidation. A lookup that starts
//! after a mutation is acknowledged therefore never sees pre-mutation scopes,
//! whichever process performed the fill.

use service_core::error::AppError;
use tracing::instrument;
use uuid::Uuid;

use super::resolver::AuthorizationResolver;
use crate::models::PrivilegeCacheEntry;
use crate::repository::{DynStore, PrivilegeCacheRepository, ResourceRepository};

/// Fills refused this many times in a row give up with `Conflict`.
const MAX_FILL_ATTEMPTS: usize = 5;

pub struct PrivilegeCacheService {
    store: DynStore,
    resolver: AuthorizationResolver,
}

impl PrivilegeCacheService {
    pub fn new(store: DynStore, resolver: AuthorizationResolver) -> Self {
        Self { store, resolver }
    }

    /// Current entry for the pair, resolving and persisting one on a miss.
    #[instrument(skip(self))]
    pub async fn cached_privileges(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
    ) -> Result<PrivilegeCacheEntry, AppError> {
        for attempt in 1..=MAX_FILL_ATTEMPTS {
            if let Some(entry) = self
                .store
                .find_current_privileges(identity_id, resource_id)
                .await?
            {
                tracing::debug!(generation = entry.generation, "Privilege cache hit");
                return Ok(entry);
            }

            let epoch = self.store.invalidation_epoch(identity_id).await?;
            let scopes = self.resolver.resolve(identity_id, resource_id).await?;
            let filled = self
                .store
                .insert_privileges(PrivilegeCacheEntry::new(identity_id, resource_id, scopes), epoch)
                .await?;

            match filled {
                Some(entry) => {
                    tracing::debug!(generation = entry.generation, "Privilege cache filled");
                    return Ok(entry);
                }
                None => tracing::debug!(attempt, "Privilege cache fill raced an invalidation"),
            }
        }

        tracing::warn!(%identity_id, %resource_id, "Privilege cache fill kept racing invalidations");
        Err(AppError::Conflict(anyhow::anyhow!(
            "privileges of identity {} on resource {} are changing, retry",
            identity_id,
            resource_id
        )))
    }

    /// Delete stale entries no token links to. Returns how many were removed.
    #[instrument(skip(self))]
    pub async fn purge_stale(&self) -> Result<u64, AppError> {
        let deleted = self.store.delete_unreferenced_stale_privileges().await?;
        if deleted > 0 {
            tracing::info!(deleted, "Purged stale privilege cache entries");
        }
        Ok(deleted)
    }

    #[instrument(skip(self))]
    pub async fn invalidate(&self, identity_id: Uuid, resource_id: Uuid) -> Result<(), AppError> {
        self.invalidate_resources(identity_id, &[resource_id]).await
    }

    /// Invalidate the identity's entries on the resource and all descendants.
    #[instrument(skip(self))]
    pub async fn invalidate_subtree(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
    ) -> Result<(), AppError> {
        let subtree = self.store.list_subtree_ids(resource_id).await?;
        self.invalidate_resources(identity_id, &subtree).await
    }

    /// Invalidate the identity's entries on an explicit set of resources.
    pub async fn invalidate_resources(
        &self,
        identity_id: Uuid,
        resource_ids: &[Uuid],
    ) -> Result<(), AppError> {
        let count = self
            .store
            .mark_privileges_stale(identity_id, resource_ids)
            .await?;
        tracing::debug!(%identity_id, invalidated = count, "Privilege cache invalidated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn invalidate_all_for_identity(&self, identity_id: Uuid) -> Result<(), AppError> {
        let count = self
            .store
            .mark_privileges_stale_for_identity(identity_id)
            .await?;
        tracing::debug!(invalidated = count, "Privilege cache invalidated for identity");
        Ok(())
    }

    /// Invalidate every identity's entries on the resource and its subtree.
    #[instrument(skip(self))]
    pub async fn invalidate_all_for_resource(&self, resource_id: Uuid) -> Result<(), AppError> {
        let subtree = self.store.list_subtree_ids(resource_id).await?;
        let count = self
            .store
            .mark_privileges_stale_for_resources(&subtree)
            .await?;
        tracing::debug!(invalidated = count, "Privilege cache invalidated for resource");
        Ok(())
    }
}
