use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::PrivilegeCacheEntry;

#[derive(Debug, Serialize, ToSchema)]
pub struct ScopesResponse {
    pub identity_id: Uuid,
    pub resource_id: Uuid,
    #[schema(example = json!(["view", "manage-team-members"]))]
    pub scopes: Vec<String>,
    pub generation: i64,
}

impl From<PrivilegeCacheEntry> for ScopesResponse {
    fn from(entry: PrivilegeCacheEntry) -> Self {
        Self {
            identity_id: entry.identity_id,
            resource_id: entry.resource_id,
            scopes: entry.scopes,
            generation: entry.generation,
        }
    }
}
