//! # Rolegate HTTP Server
//!
//! Small host for the authorization resolver. Useful for trying tokens and
//! role mappings against a running service.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /api/v1/protected` - Returns the caller's username and granted roles.
//!   Accepts a bearer token or an `x-api-key` header.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `PORT` - HTTP server port (default: 8080)
//! - `ROLEGATE_CONFIG` - Path to a TOML configuration file (optional)
//! - `RUN_ENVIRONMENT` - `dev` or `prod`, overrides the file
//! - `JwtSigningKey` - Custom-token signing secret
//! - `RUST_LOG` - Log level (default: info)

use anyhow::Context;
use axum::{
    extract::{Extension, State},
    response::Json,
    routing::get,
    Router,
    serve,
};
use rolegate_authz::{
    require_roles, ApiKeyAuthenticator, AuthContext, AuthorizationGate, AuthzConfig, DecisionCache,
    InMemoryApiKeyStore, InMemoryRoleStore, InMemorySecretStore, RemoteJwksResolver, RoleResolver,
    RouteGuard, TokenVerifier, AUTH_DECISION_CACHE_TTL,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shared application state
#[derive(Clone)]
struct AppState {
    cache: Arc<DecisionCache>,
    start_time: std::time::Instant,
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
    version: String,
    cached_decisions: usize,
}

/// Protected route response
#[derive(Debug, Serialize)]
struct ProtectedResponse {
    username: String,
    roles: Vec<String>,
}

/// GET /health - Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: rolegate_authz::VERSION.to_string(),
        cached_decisions: state.cache.len(),
    })
}

/// GET /api/v1/protected - Echo the authorized caller
async fn protected(Extension(ctx): Extension<AuthContext>) -> Json<ProtectedResponse> {
    Json(ProtectedResponse {
        username: ctx.username,
        roles: ctx.granted_roles.into_iter().collect(),
    })
}

/// Create the HTTP router with all endpoints
fn create_router(state: AppState, gate: Arc<AuthorizationGate>) -> Router {
    let trace = TraceLayer::new_for_http()
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let protected_routes = Router::new()
        .route("/api/v1/protected", get(protected))
        .layer(axum::middleware::from_fn_with_state(
            RouteGuard::authenticated(gate),
            require_roles,
        ));

    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
        .merge(protected_routes)
        .layer(ServiceBuilder::new().layer(trace))
}

/// Load the configuration file if one is named, then apply the environment
fn load_config() -> anyhow::Result<AuthzConfig> {
    let mut config = match std::env::var("ROLEGATE_CONFIG") {
        Ok(path) => AuthzConfig::load(&path)?,
        Err(_) => {
            warn!("ROLEGATE_CONFIG not set, using default configuration");
            AuthzConfig::default()
        }
    };

    config.apply_env_overrides()?;
    config.validate()?;

    Ok(config)
}

/// Build the role stores from the configuration's seed section
async fn seeded_stores(config: &AuthzConfig) -> (Arc<InMemoryRoleStore>, Arc<InMemoryRoleStore>) {
    let users = Arc::new(InMemoryRoleStore::new());
    for (username, record) in &config.seed.user_roles {
        users.put(username.clone(), record.clone()).await;
    }

    let groups = Arc::new(InMemoryRoleStore::new());
    for (group_id, record) in &config.seed.group_roles {
        groups.put(group_id.clone(), record.clone()).await;
    }

    info!(
        users = config.seed.user_roles.len(),
        groups = config.seed.group_roles.len(),
        "Seeded role stores"
    );

    (users, groups)
}

/// Build the API key table from the configuration's seed section
async fn seeded_api_keys(config: &AuthzConfig) -> Arc<InMemoryApiKeyStore> {
    let api_keys = Arc::new(InMemoryApiKeyStore::new());
    for record in &config.seed.api_keys {
        api_keys.put(record.clone()).await;
    }

    info!(api_keys = config.seed.api_keys.len(), "Seeded API key store");
    api_keys
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}

/// Main server entrypoint
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Rolegate Server v{}", rolegate_authz::VERSION);

    let config = load_config()?;
    let environment = config.active_environment();

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    info!("Configuration:");
    info!("  Port: {}", port);
    info!("  Environment: {}", config.run_environment);
    info!("  Cache TTL: {}s", AUTH_DECISION_CACHE_TTL.as_secs());
    info!("  JWKS: {}", config.jwks.uri);

    let cache = Arc::new(DecisionCache::new());
    let sweeper = cache.spawn_sweeper(config.cache.sweep_interval());

    let jwks = Arc::new(
        RemoteJwksResolver::new(config.jwks.uri.clone(), config.jwks.key_cache())
            .with_refetch_interval(config.jwks.refetch_interval()),
    );

    let verifier = TokenVerifier::new(
        config.run_environment,
        environment.clone(),
        jwks,
        Arc::new(InMemorySecretStore::new()),
    )
    .with_signing_key_override(config.signing_key_override.clone());

    let (users, groups) = seeded_stores(&config).await;
    let resolver = RoleResolver::new(Arc::clone(&cache), users, groups)
        .with_catalog(config.role_catalog())
        .with_azure_role_mapping(environment.azure_role_mapping);

    let api_keys = ApiKeyAuthenticator::new(seeded_api_keys(&config).await);

    let gate = Arc::new(
        AuthorizationGate::new(Arc::new(verifier), Arc::new(resolver)).with_api_keys(Arc::new(api_keys)),
    );

    let state = AppState {
        cache: Arc::clone(&cache),
        start_time: std::time::Instant::now(),
    };

    let app = create_router(state, gate);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server on {}", addr))?;

    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    sweeper.shutdown().await;
    let stats = cache.stats();
    info!(
        hits = stats.hits,
        misses = stats.misses,
        hit_rate = stats.hit_rate(),
        "Server shut down gracefully"
    );

    Ok(())
}
