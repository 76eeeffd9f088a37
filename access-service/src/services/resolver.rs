//! Authorization resolution over the resource hierarchy.
//!
//! The effective scopes of an identity on a resource are the union of the
//! scopes of its assignments on the resource itself and on every ancestor
//! whose resource type propagates. A bare membership contributes the default
//! member scopes of the resource type it was granted on.

use service_core::error::AppError;
use std::collections::{BTreeSet, HashSet};
use tracing::instrument;
use uuid::Uuid;

use crate::repository::{
    DynStore, IdentityRepository, IdentityRoleRepository, ResourceRepository,
    ResourceTypeRepository, RoleRepository,
};

#[derive(Clone)]
pub struct AuthorizationResolver {
    store: DynStore,
}

impl AuthorizationResolver {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    /// Sorted, deduplicated scopes `identity_id` holds on `resource_id`.
    ///
    /// `NotFound` when either does not exist. No privileges is an empty set.
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
    ) -> Result<Vec<String>, AppError> {
        if self.store.find_identity(identity_id).await?.is_none() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "identity {} not found",
                identity_id
            )));
        }
        let mut current = self.store.find_resource(resource_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("resource {} not found", resource_id))
        })?;

        let mut scopes = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut is_target = true;

        loop {
            if !visited.insert(current.resource_id) {
                // Creation rejects cycles, so this is a corrupt store.
                tracing::error!(resource_id = %current.resource_id, "Resource hierarchy contains a cycle");
                return Err(AppError::InternalError(anyhow::anyhow!(
                    "resource hierarchy cycle at {}",
                    current.resource_id
                )));
            }

            let resource_type = self
                .store
                .find_resource_type(current.resource_type_id)
                .await?
                .ok_or_else(|| {
                    AppError::InternalError(anyhow::anyhow!(
                        "resource type {} of resource {} not found",
                        current.resource_type_id,
                        current.resource_id
                    ))
                })?;

            if is_target || resource_type.propagates {
                let assignments = self
                    .store
                    .list_identity_roles(identity_id, current.resource_id)
                    .await?;
                for assignment in assignments {
                    match assignment.role_id {
                        None => scopes.extend(resource_type.default_member_scopes.iter().cloned()),
                        Some(role_id) => {
                            scopes.extend(self.store.list_role_scopes(role_id).await?);
                        }
                    }
                }
            }

            let Some(parent_id) = current.parent_resource_id else {
                break;
            };
            current = self.store.find_resource(parent_id).await?.ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!(
                    "parent resource {} of {} not found",
                    parent_id,
                    current.resource_id
                ))
            })?;
            is_target = false;
        }

        tracing::debug!(scope_count = scopes.len(), "Resolved privileges");
        Ok(scopes.into_iter().collect())
    }

    pub async fn has_scope(
        &self,
        identity_id: Uuid,
        resource_id: Uuid,
        scope: &str,
    ) -> Result<bool, AppError> {
        Ok(self
            .resolve(identity_id, resource_id)
            .await?
            .iter()
            .any(|s| s == scope))
    }
}
