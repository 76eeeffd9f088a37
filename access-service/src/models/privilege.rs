//! Privilege cache model - resolved scopes for an (identity, resource) pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Derived projection of the role graph. Always reconstructible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PrivilegeCacheEntry {
    pub privilege_cache_id: Uuid,
    pub identity_id: Uuid,
    pub resource_id: Uuid,
    /// Sorted, deduplicated scope names.
    pub scopes: Vec<String>,
    /// Store-wide monotonically increasing version marker.
    pub generation: i64,
    pub stale: bool,
    pub created_utc: DateTime<Utc>,
}

impl PrivilegeCacheEntry {
    /// Build a fresh entry. The generation is assigned by the store on insert.
    pub fn new(identity_id: Uuid, resource_id: Uuid, scopes: Vec<String>) -> Self {
        Self {
            privilege_cache_id: Uuid::new_v4(),
            identity_id,
            resource_id,
            scopes,
            generation: 0,
            stale: false,
            created_utc: Utc::now(),
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.binary_search_by(|s| s.as_str().cmp(scope)).is_ok()
    }
}
