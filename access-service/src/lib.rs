pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod repository;
pub mod services;
pub mod utils;

use service_core::axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::middleware::{
    security_headers::security_headers_middleware, tracing::request_id_middleware,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{AccessConfig, Environment};
use crate::providers::ProviderRegistry;
use crate::repository::DynStore;
use crate::services::{
    AuthorizationResolver, InvitationService, JwtService, NotificationSender,
    PrivilegeCacheService, RoleGraphService, TokenService, WorkspaceClient,
};
use service_core::error::AppError;
use std::sync::Arc;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::token::exchange,
        handlers::token::refresh,
        handlers::token::audit,
        handlers::token::link,
        handlers::token::link_callback,
        handlers::token::logout,
        handlers::invitation::issue,
        handlers::invitation::list,
        handlers::invitation::accept,
        handlers::invitation::rescind,
        handlers::resource::scopes,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::token::TokenRequest,
            dtos::token::RefreshRequest,
            dtos::token::AuditResponse,
            dtos::token::LogoutResponse,
            dtos::invitation::IssueInvitationsRequest,
            dtos::invitation::InvitationResponse,
            dtos::invitation::AcceptResponse,
            dtos::resource::ScopesResponse,
            services::InvitationRequest,
            services::TokenResponse,
            services::Permission,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Token", description = "Token exchange, refresh, audit and account linking"),
        (name = "Invitation", description = "Invitation issue, accept and rescind"),
        (name = "Resource", description = "Privilege resolution"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AccessConfig,
    pub store: DynStore,
    pub jwt: Arc<JwtService>,
    pub resolver: AuthorizationResolver,
    pub cache: Arc<PrivilegeCacheService>,
    pub role_graph: RoleGraphService,
    pub invitations: Arc<InvitationService>,
    pub tokens: Arc<TokenService>,
}

impl AppState {
    /// Wire the services over a store and injected collaborators.
    pub fn new(
        config: AccessConfig,
        store: DynStore,
        jwt: JwtService,
        notifications: Arc<dyn NotificationSender>,
        workspace: Arc<dyn WorkspaceClient>,
        providers: ProviderRegistry,
    ) -> Self {
        let jwt = Arc::new(jwt);
        let resolver = AuthorizationResolver::new(store.clone());
        let cache = Arc::new(PrivilegeCacheService::new(store.clone(), resolver.clone()));
        let role_graph = RoleGraphService::new(store.clone(), cache.clone());
        let invitations = Arc::new(InvitationService::new(
            store.clone(),
            resolver.clone(),
            cache.clone(),
            notifications,
            workspace,
            config.invitation.accept_url_base.clone(),
        ));
        let tokens = Arc::new(TokenService::new(
            store.clone(),
            jwt.clone(),
            cache.clone(),
            Arc::new(providers),
            config.service_accounts.clone(),
        ));

        Self {
            config,
            store,
            jwt,
            resolver,
            cache,
            role_graph,
            invitations,
            tokens,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/token/audit", post(handlers::token::audit))
        .route("/api/token/link", get(handlers::token::link))
        .route("/api/logout", post(handlers::token::logout))
        .route(
            "/api/invitations/:id",
            post(handlers::invitation::issue)
                .get(handlers::invitation::list)
                .delete(handlers::invitation::rescind),
        )
        .route(
            "/api/resources/:resource_id/scopes",
            get(handlers::resource::scopes),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let mut app = Router::new().route("/health", get(health_check));

    if state.config.environment == Environment::Dev {
        app = app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { service_core::axum::Json(ApiDoc::openapi()) }),
        );
    }

    app.route("/api/token", post(handlers::token::exchange))
        .route("/api/token/refresh", post(handlers::token::refresh))
        .route(
            "/api/token/link/callback",
            get(handlers::token::link_callback),
        )
        .route(
            "/api/invitations/accept/:accept_code",
            get(handlers::invitation::accept),
        )
        .merge(protected)
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    path = %redacted_path(request.uri().path()),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config))
}

const ACCEPT_PATH_PREFIX: &str = "/api/invitations/accept/";

/// Request path safe to log. Accept codes are bearer secrets and query
/// strings carry OAuth codes, so neither reaches the logs.
fn redacted_path(path: &str) -> std::borrow::Cow<'_, str> {
    match path.strip_prefix(ACCEPT_PATH_PREFIX) {
        Some(code) if !code.is_empty() => format!("{}{{accept_code}}", ACCEPT_PATH_PREFIX).into(),
        _ => path.into(),
    }
}

fn cors_layer(config: &AccessConfig) -> CorsLayer {
    let origins = config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<service_core::axum::http::HeaderValue>() {
            Ok(origin) => Some(origin),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            service_core::axum::http::Method::GET,
            service_core::axum::http::Method::POST,
            service_core::axum::http::Method::DELETE,
            service_core::axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            service_core::axum::http::header::AUTHORIZATION,
            service_core::axum::http::header::CONTENT_TYPE,
        ])
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 500, description = "Store is unreachable")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    service_core::axum::extract::State(state): service_core::axum::extract::State<AppState>,
) -> Result<service_core::axum::Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        e
    })?;

    Ok(service_core::axum::Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "store": "up"
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_path_hides_accept_codes() {
        assert_eq!(
            redacted_path("/api/invitations/accept/3f9a0c7e1b"),
            "/api/invitations/accept/{accept_code}"
        );
        assert_eq!(redacted_path("/api/invitations/accept/"), "/api/invitations/accept/");
        assert_eq!(redacted_path("/api/token/refresh"), "/api/token/refresh");
    }
}
