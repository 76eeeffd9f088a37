use access_service::{
    build_router,
    config::AccessConfig,
    db,
    providers::ProviderRegistry,
    repository::{DynStore, MemoryStore, PgStore},
    services::{
        HttpWorkspaceClient, JwtService, MockWorkspaceClient, NotificationClient,
        TokenPurgeJob, WorkspaceClient,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AccessConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting access service"
    );

    let store: DynStore = match config.database.url.as_deref() {
        Some(url) => {
            let pool = db::create_pool(url, &config.database)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
            db::run_migrations(&pool)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let jwt = JwtService::new(&config.jwt).map_err(AppError::ConfigError)?;
    let notifications = Arc::new(NotificationClient::new(&config.notification)?);
    let workspace: Arc<dyn WorkspaceClient> = if config.workspace.enabled {
        Arc::new(HttpWorkspaceClient::new(&config.workspace)?)
    } else {
        tracing::warn!("WORKSPACE_SERVICE_URL not set, space lookups use an empty registry");
        Arc::new(MockWorkspaceClient::new())
    };
    let providers = ProviderRegistry::from_config(&config)?;

    let state = AppState::new(
        config.clone(),
        store,
        jwt,
        notifications,
        workspace,
        providers,
    );

    state.role_graph.ensure_builtin_resource_types().await?;

    let purge_job = TokenPurgeJob::new(state.tokens.clone(), &config.maintenance);
    let purge_shutdown = purge_job.shutdown_token();
    let purge_handle = purge_job.start();

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    purge_shutdown.cancel();
    if let Err(e) = purge_handle.await {
        tracing::error!(error = %e, "Token purge job ended abnormally");
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
