//! Resource model - instances of a resource type, arranged as a tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Resource entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Resource {
    pub resource_id: Uuid,
    pub resource_type_id: Uuid,
    pub parent_resource_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub name: String,
    pub created_utc: DateTime<Utc>,
}

impl Resource {
    /// Create a new resource.
    pub fn new(
        resource_type_id: Uuid,
        name: impl Into<String>,
        parent_resource_id: Option<Uuid>,
        owner_id: Option<Uuid>,
    ) -> Self {
        Self {
            resource_id: Uuid::new_v4(),
            resource_type_id,
            parent_resource_id,
            owner_id,
            name: name.into(),
            created_utc: Utc::now(),
        }
    }

    /// Create a resource with a caller-supplied ID (e.g. an external space ID).
    pub fn with_id(mut self, resource_id: Uuid) -> Self {
        self.resource_id = resource_id;
        self
    }
}
