//! Notification service client.
//!
//! Delivery is asynchronous: `send_messages_async` hands back a
//! [`DeliveryHandle`] that resolves once every message has been posted, so
//! callers are never blocked on delivery.

use serde::{Deserialize, Serialize};
use service_core::axum::async_trait;
use service_core::error::AppError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::config::NotificationServiceConfig;

/// A message addressed to one identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub target_id: Uuid,
    pub target_type: String,
    pub user_id: Option<Uuid>,
    pub message_type: String,
    pub custom: serde_json::Value,
}

impl Message {
    pub fn to_identity(
        target_id: Uuid,
        sender_id: Uuid,
        message_type: &str,
        custom: serde_json::Value,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            target_id,
            target_type: "identity".to_string(),
            user_id: Some(sender_id),
            message_type: message_type.to_string(),
            custom,
        }
    }
}

/// Eventual outcome of a batch delivery.
pub type DeliveryHandle = oneshot::Receiver<Result<(), AppError>>;

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_messages_async(&self, messages: Vec<Message>) -> Result<DeliveryHandle, AppError>;
}

/// HTTP client for the notification service.
#[derive(Clone)]
pub struct NotificationClient {
    http: reqwest::Client,
    base_url: String,
    enabled: bool,
}

impl NotificationClient {
    pub fn new(config: &NotificationServiceConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;

        tracing::info!(
            url = %config.url,
            enabled = config.enabled,
            "Notification client configured"
        );

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            enabled: config.enabled,
        })
    }

    async fn post_all(http: reqwest::Client, url: String, messages: Vec<Message>) -> Result<(), AppError> {
        for message in messages {
            let response = http
                .post(&url)
                .json(&message)
                .send()
                .await
                .map_err(|e| AppError::BadGateway(format!("Notification service unreachable: {}", e)))?;

            if !response.status().is_success() {
                return Err(AppError::BadGateway(format!(
                    "Notification service rejected message {}: {}",
                    message.message_id,
                    response.status()
                )));
            }
            tracing::debug!(message_id = %message.message_id, "Notification delivered");
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSender for NotificationClient {
    async fn send_messages_async(&self, messages: Vec<Message>) -> Result<DeliveryHandle, AppError> {
        let (tx, rx) = oneshot::channel();

        if !self.enabled {
            tracing::debug!(count = messages.len(), "Notifications disabled, dropping messages");
            let _ = tx.send(Ok(()));
            return Ok(rx);
        }

        let http = self.http.clone();
        let url = format!("{}/api/notify", self.base_url);
        tokio::spawn(async move {
            let _ = tx.send(Self::post_all(http, url, messages).await);
        });
        Ok(rx)
    }
}

/// Records messages instead of delivering them.
#[derive(Default)]
pub struct MockNotificationSender {
    pub sent: Mutex<Vec<Message>>,
    pub calls: AtomicUsize,
    fail_delivery: bool,
}

impl MockNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts messages but reports every delivery as failed.
    pub fn failing() -> Self {
        Self {
            fail_delivery: true,
            ..Self::default()
        }
    }

    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSender for MockNotificationSender {
    async fn send_messages_async(&self, messages: Vec<Message>) -> Result<DeliveryHandle, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Mock sender mutex poisoned: {}", e)))?
            .extend(messages);

        let (tx, rx) = oneshot::channel();
        let result = if self.fail_delivery {
            Err(AppError::BadGateway("mock delivery failure".to_string()))
        } else {
            Ok(())
        };
        let _ = tx.send(result);
        Ok(rx)
    }
}
