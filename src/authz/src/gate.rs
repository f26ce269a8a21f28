//! Request-level authorization
//!
//! `AuthorizationGate::authorize` runs one request through verification, role
//! resolution and the required-role check:
//!
//! ```text
//! header -> verify (custom | aad) -> principal -> resolve roles -> allow | deny
//! ```
//!
//! Any verification failure ends in `Unauthenticated`; a deny ends in
//! `Unauthorized`. Errors leaving the gate are always one of the three
//! caller-facing variants.
//!
//! `authorize_api_key` is the alternative entry for `x-api-key` callers. The
//! key record carries its own roles, so the resolver is not consulted.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::apikey::{ApiKeyAuthenticator, INVALID_API_KEY_MESSAGE};
use crate::error::{AuthzError, Result};
use crate::resolver::RoleResolver;
use crate::token::{IssuerKind, TokenVerifier};

/// Message returned when no required role was granted
pub const INSUFFICIENT_PRIVILEGES_MESSAGE: &str = "User does not have the privileges for this task.";

/// Authorization outcome attached to the request context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    pub username: String,
    pub issuer: IssuerKind,
    pub granted_roles: BTreeSet<String>,
}

impl AuthContext {
    pub fn has_role(&self, role: &str) -> bool {
        self.granted_roles.contains(role)
    }
}

/// Verifies a caller and checks their roles against a route's requirements
pub struct AuthorizationGate {
    verifier: Arc<TokenVerifier>,
    resolver: Arc<RoleResolver>,
    api_keys: Option<Arc<ApiKeyAuthenticator>>,
}

fn admits<S: AsRef<str>>(required: &[S], granted: &BTreeSet<String>) -> bool {
    required.is_empty() || required.iter().any(|role| granted.contains(role.as_ref()))
}

impl AuthorizationGate {
    pub fn new(verifier: Arc<TokenVerifier>, resolver: Arc<RoleResolver>) -> Self {
        Self {
            verifier,
            resolver,
            api_keys: None,
        }
    }

    /// Accept `x-api-key` callers checked by this authenticator
    pub fn with_api_keys(mut self, api_keys: Arc<ApiKeyAuthenticator>) -> Self {
        self.api_keys = Some(api_keys);
        self
    }

    pub fn verifier(&self) -> &Arc<TokenVerifier> {
        &self.verifier
    }

    pub fn resolver(&self) -> &Arc<RoleResolver> {
        &self.resolver
    }

    /// Authorize a request
    ///
    /// `header` is the raw `Authorization` header value. An empty `required`
    /// set admits every verified caller.
    pub async fn authorize<S: AsRef<str>>(&self, header: Option<&str>, required: &[S]) -> Result<AuthContext> {
        self.decide(header, required).await.map_err(AuthzError::normalize)
    }

    async fn decide<S: AsRef<str>>(&self, header: Option<&str>, required: &[S]) -> Result<AuthContext> {
        let started = Instant::now();

        let verified = self.verifier.verify(header).await?;
        let principal = verified.principal;
        debug!(
            username = %principal.username,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Token verified"
        );

        let resolving = Instant::now();
        let granted_roles = self.resolver.resolve(&principal).await;
        debug!(
            username = %principal.username,
            roles = granted_roles.len(),
            elapsed_us = resolving.elapsed().as_micros() as u64,
            "Roles resolved"
        );

        if !admits(required, &granted_roles) {
            debug!(username = %principal.username, "Authorization denied");
            return Err(AuthzError::Unauthorized(INSUFFICIENT_PRIVILEGES_MESSAGE.to_string()));
        }

        info!(username = %principal.username, issuer = ?principal.issuer, "Authenticated user");
        debug!(elapsed_us = started.elapsed().as_micros() as u64, "Authorization decided");

        Ok(AuthContext {
            username: principal.username,
            issuer: principal.issuer,
            granted_roles,
        })
    }

    /// Authorize a request carrying an `x-api-key` header
    pub async fn authorize_api_key<S: AsRef<str>>(&self, api_key: &str, required: &[S]) -> Result<AuthContext> {
        self.decide_api_key(api_key, required).await.map_err(AuthzError::normalize)
    }

    async fn decide_api_key<S: AsRef<str>>(&self, api_key: &str, required: &[S]) -> Result<AuthContext> {
        let api_keys = self
            .api_keys
            .as_ref()
            .ok_or_else(|| AuthzError::Unauthenticated(INVALID_API_KEY_MESSAGE.to_string()))?;

        let identity = api_keys.authenticate(api_key).await?;

        if !admits(required, &identity.roles) {
            debug!(username = %identity.username, "API key authorization denied");
            return Err(AuthzError::Unauthorized(INSUFFICIENT_PRIVILEGES_MESSAGE.to_string()));
        }

        info!(username = %identity.username, "Authenticated API key");

        Ok(AuthContext {
            username: identity.username,
            issuer: IssuerKind::ApiKey,
            granted_roles: identity.roles,
        })
    }
}
