//! # Server Configuration
//!
//! Application state, router and the serve loop for the channels API.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::connections::{ConnectionService, StatusRefresher};
use crate::crypto::CryptoKey;
use crate::handlers::{self, connections, pairings};
use crate::pairing::PairingManager;
use crate::provider::{HttpMessagingProvider, MessagingProvider};
use crate::repositories::{ConnectionRepository, TenantRepository};
use crate::telemetry::trace_id_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub connections: ConnectionService,
    pub refresher: StatusRefresher,
    pub pairings: PairingManager,
    /// Cancelled once on shutdown; pairing attempts and the refresher hang off it
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire services over `db` and `provider`.
    pub fn build(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        provider: Arc<dyn MessagingProvider>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let key_bytes = config
            .crypto_key
            .clone()
            .context("crypto key not present in configuration")?;
        let crypto_key = CryptoKey::new(key_bytes).context("initializing crypto key")?;

        let shared_db = Arc::new(db.clone());
        let connections = ConnectionService::new(
            ConnectionRepository::new(Arc::clone(&shared_db)),
            TenantRepository::new(shared_db),
            crypto_key,
            Arc::clone(&provider),
            config.webhook_base().map(str::to_owned),
        );
        let refresher = StatusRefresher::new(connections.clone(), config.status_refresh.clone());
        let pairings = PairingManager::new(
            provider,
            connections.clone(),
            refresher.clone(),
            config.pairing.clone(),
            shutdown.clone(),
        );

        Ok(Self {
            config,
            db,
            connections,
            refresher,
            pairings,
            shutdown,
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/connections", get(connections::list_connections))
        .route("/connections/verify", post(connections::verify_connection))
        .route("/connections/refresh", post(connections::refresh_connections))
        .route(
            "/connections/{id}",
            get(connections::get_connection)
                .patch(connections::update_connection)
                .delete(connections::delete_connection),
        )
        .route(
            "/connections/{id}/webhook",
            post(connections::configure_webhook),
        )
        .route("/pairings", post(pairings::start_pairing))
        .route(
            "/pairings/{id}",
            get(pairings::get_pairing).delete(pairings::cancel_pairing),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_id_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Starts the server with the given configuration
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;

    let provider: Arc<dyn MessagingProvider> =
        Arc::new(HttpMessagingProvider::from_config(&config.provider)?);
    let shutdown = CancellationToken::new();
    let state = AppState::build(Arc::new(config), db, provider, shutdown.clone())?;

    let refresher = state.refresher.clone();
    let refresher_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { refresher.run(shutdown).await }
    });
    let pairings = state.pairings.clone();
    let profile = state.config.profile.clone();

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    pairings.shutdown().await;
    if let Err(err) = refresher_task.await {
        tracing::warn!(error = %err, "Status refresher task ended abnormally");
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::connections::list_connections,
        crate::handlers::connections::get_connection,
        crate::handlers::connections::update_connection,
        crate::handlers::connections::delete_connection,
        crate::handlers::connections::configure_webhook,
        crate::handlers::connections::verify_connection,
        crate::handlers::connections::refresh_connections,
        crate::handlers::pairings::start_pairing,
        crate::handlers::pairings::get_pairing,
        crate::handlers::pairings::cancel_pairing,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::ConnectionStatus,
            crate::handlers::HealthResponse,
            crate::handlers::connections::ConnectionInfo,
            crate::handlers::connections::ConnectionsResponse,
            crate::handlers::connections::RefreshResponse,
            crate::handlers::connections::UpdateConnectionRequest,
            crate::handlers::connections::VerifyConnectionRequest,
            crate::handlers::connections::WebhookResponse,
            crate::handlers::pairings::StartPairingRequest,
            crate::connections::VerificationResponse,
            crate::connections::VerificationStatus,
            crate::pairing::PairingStarted,
            crate::pairing::PairingSnapshot,
            crate::pairing::AttemptStatus,
            crate::pairing::FailureReason,
            crate::error::ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Channels API",
        description = "Pairing and management of messaging channel connections",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
