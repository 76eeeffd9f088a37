//! Workspace (space) service client.

use serde::{Deserialize, Serialize};
use service_core::axum::async_trait;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::config::WorkspaceServiceConfig;

/// Space facts the access core relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Space {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
}

#[async_trait]
pub trait WorkspaceClient: Send + Sync {
    async fn get_space(&self, space_id: Uuid) -> Result<Space, AppError>;
}

#[derive(Debug, Deserialize)]
struct SpaceEnvelope {
    data: SpaceData,
}

#[derive(Debug, Deserialize)]
struct SpaceData {
    id: Uuid,
    attributes: SpaceAttributes,
    relationships: SpaceRelationships,
}

#[derive(Debug, Deserialize)]
struct SpaceAttributes {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpaceRelationships {
    #[serde(rename = "owned-by")]
    owned_by: OwnedBy,
}

#[derive(Debug, Deserialize)]
struct OwnedBy {
    data: OwnerRef,
}

#[derive(Debug, Deserialize)]
struct OwnerRef {
    id: Uuid,
}

/// HTTP client for the workspace service.
#[derive(Clone)]
pub struct HttpWorkspaceClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpWorkspaceClient {
    pub fn new(config: &WorkspaceServiceConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl WorkspaceClient for HttpWorkspaceClient {
    #[tracing::instrument(skip(self))]
    async fn get_space(&self, space_id: Uuid) -> Result<Space, AppError> {
        let response = self
            .http
            .get(format!("{}/api/spaces/{}", self.base_url, space_id))
            .send()
            .await
            .map_err(|e| AppError::BadGateway(format!("Workspace service unreachable: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(anyhow::anyhow!("space {} not found", space_id)));
        }
        if !response.status().is_success() {
            tracing::error!(status = %response.status(), "Workspace lookup failed");
            return Err(AppError::BadGateway(format!(
                "Workspace service returned {}",
                response.status()
            )));
        }

        let envelope = response
            .json::<SpaceEnvelope>()
            .await
            .map_err(|e| AppError::BadGateway(format!("Invalid space payload: {}", e)))?;

        Ok(Space {
            id: envelope.data.id,
            owner_id: envelope.data.relationships.owned_by.data.id,
            name: envelope.data.attributes.name,
        })
    }
}

/// Serves spaces from memory, for deployments without a workspace service
/// and for tests.
#[derive(Default)]
pub struct MockWorkspaceClient {
    spaces: Mutex<HashMap<Uuid, Space>>,
    pub calls: AtomicUsize,
}

impl MockWorkspaceClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_space(&self, space: Space) {
        if let Ok(mut spaces) = self.spaces.lock() {
            spaces.insert(space.id, space);
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkspaceClient for MockWorkspaceClient {
    async fn get_space(&self, space_id: Uuid) -> Result<Space, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.spaces
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Mock workspace mutex poisoned: {}", e)))?
            .get(&space_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("space {} not found", space_id)))
    }
}
