//! # Rolegate Authorization Resolver
//!
//! Bearer-token authentication and role resolution for HTTP services.
//!
//! ## Features
//!
//! - **Two trust paths**: HS256 custom tokens (non-production only) and RS256
//!   identity-provider tokens verified against a JWKS endpoint
//! - **Role merging** from group mappings, app-role claims and per-user overrides
//! - **Settle-all fan-out**: one failing group lookup never hides the others
//! - **TTL decision cache** shared across requests, with negative caching and a
//!   background sweeper
//! - **API keys** in an `x-api-key` header, checked against stored hashes
//! - **axum middleware** that attaches the outcome to the request
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rolegate_authz::{
//!     AuthorizationGate, DecisionCache, InMemoryRoleStore, InMemorySecretStore,
//!     RoleResolver, RunEnvironment, StaticJwksResolver, TokenVerifier,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = Arc::new(DecisionCache::new());
//!     let roles = Arc::new(InMemoryRoleStore::new());
//!
//!     let verifier = TokenVerifier::new(
//!         RunEnvironment::Dev,
//!         Default::default(),
//!         Arc::new(StaticJwksResolver::new()),
//!         Arc::new(InMemorySecretStore::new()),
//!     )
//!     .with_signing_key_override(Some("dev-secret".to_string()));
//!     let resolver = RoleResolver::new(cache, roles.clone(), roles);
//!
//!     let gate = AuthorizationGate::new(Arc::new(verifier), Arc::new(resolver));
//!     let ctx = gate.authorize(Some("Bearer <token>"), &["manage:events"]).await?;
//!
//!     println!("{} may manage events", ctx.username);
//!     Ok(())
//! }
//! ```

pub mod apikey;
pub mod cache;
pub mod config;
pub mod error;
pub mod gate;
pub mod jwks;
pub mod middleware;
pub mod resolver;
pub mod roles;
pub mod store;
pub mod token;

// Re-export commonly used types
pub use apikey::{generate_api_key, ApiKeyAuthenticator, ApiKeyIdentity, GeneratedApiKey};
pub use cache::{cache_keys, CacheStats, DecisionCache, SweeperHandle, AUTH_DECISION_CACHE_TTL};
pub use config::{AuthzConfig, EnvironmentConfig, RunEnvironment};
pub use error::{AuthzError, ErrorBody, Result};
pub use gate::{AuthContext, AuthorizationGate};
pub use jwks::{JwksResolver, RemoteJwksResolver, StaticJwksResolver};
pub use middleware::{require_roles, RouteGuard, API_KEY_HEADER};
pub use resolver::RoleResolver;
pub use roles::{AppRole, RoleCatalog, RoleList};
pub use store::{
    ApiKeyRecord, ApiKeyStore, GroupRoleStore, InMemoryApiKeyStore, InMemoryRevocationList,
    InMemoryRoleStore, InMemorySecretStore, RoleRecord, SecretStore, TokenRevocationList,
    UserRoleStore,
};
pub use token::{IssuerKind, Principal, TokenClaims, TokenVerifier, VerifiedToken};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
