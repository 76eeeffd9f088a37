//! Background purge of expired tokens and stale privilege snapshots.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::token::TokenService;
use crate::config::MaintenanceConfig;

/// Periodically deletes tokens expired beyond the retention window and the
/// privilege snapshots they no longer pin.
pub struct TokenPurgeJob {
    tokens: Arc<TokenService>,
    retention_hours: i64,
    interval: Duration,
    shutdown_token: CancellationToken,
}

impl TokenPurgeJob {
    pub fn new(tokens: Arc<TokenService>, config: &MaintenanceConfig) -> Self {
        Self {
            tokens,
            retention_hours: config.token_retention_hours,
            interval: Duration::from_secs(config.purge_interval_seconds),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token that stops the job when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Run one purge pass. A failure ends this pass only.
    pub async fn run_once(&self) -> Result<u64, service_core::error::AppError> {
        self.tokens.purge_expired(self.retention_hours).await
    }

    pub fn start(self) -> JoinHandle<()> {
        tracing::info!(
            retention_hours = self.retention_hours,
            interval_seconds = self.interval.as_secs(),
            "Starting token purge job"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => {
                        tracing::info!("Token purge job shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::error!(error = %e, "Token purge failed");
                        }
                    }
                }
            }
        })
    }
}
