//! Bearer token verification
//!
//! A token is verified through exactly one of two trust paths, picked once
//! from its unverified `iss` claim:
//!
//! - **Custom**: `iss == "custom_jwt"`, HS256 with a shared secret, refused in
//!   production.
//! - **Aad**: every other issuer, RS256 with a key discovered by `kid`, audience
//!   `api://<client id>`.

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::config::{EnvironmentConfig, RunEnvironment};
use crate::error::{AuthzError, Result, INVALID_TOKEN_MESSAGE};
use crate::jwks::JwksResolver;
use crate::store::{SecretStore, TokenRevocationList};

/// Issuer value that selects the custom trust path
pub const CUSTOM_ISSUER: &str = "custom_jwt";

/// Secret holding the custom-token signing key under `jwt_key`
pub const TESTING_CREDENTIALS_SECRET: &str = "rolegate-testing-credentials";

/// Which trust path established the identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuerKind {
    Custom,
    Aad,
    /// Authenticated with an `x-api-key` header rather than a token
    ApiKey,
}

/// Trust path chosen for one token, with only the parameters it needs
#[derive(Debug, Clone, PartialEq, Eq)]
enum TrustPath {
    Custom,
    Aad { kid: Option<String> },
}

/// Claims consumed from a verified token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// User principal name, used when `email` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,

    /// Token identifier checked against the revocation list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uti: Option<String>,

    pub exp: u64,
}

/// Legacy UPN domain rewritten to the primary one
const LEGACY_UPN_DOMAIN: &str = "acm.illinois.edu";
const PRIMARY_UPN_DOMAIN: &str = "illinois.edu";

impl TokenClaims {
    /// `email`, then `upn` with the legacy domain rewritten, then `sub`
    pub fn username(&self) -> Option<String> {
        let present = |v: &Option<String>| v.as_deref().filter(|v| !v.is_empty()).map(str::to_string);

        present(&self.email)
            .or_else(|| present(&self.upn).map(|upn| upn.replace(LEGACY_UPN_DOMAIN, PRIMARY_UPN_DOMAIN)))
            .or_else(|| present(&self.sub))
    }
}

/// Identity derived from a verified token for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    pub issuer: IssuerKind,
    pub group_ids: BTreeSet<String>,
    pub app_role_claims: BTreeSet<String>,
}

impl Principal {
    fn from_claims(issuer: IssuerKind, claims: &TokenClaims) -> Result<Self> {
        let username = claims
            .username()
            .ok_or_else(|| AuthzError::Unauthenticated("Token does not identify a user.".to_string()))?;

        Ok(Self {
            username,
            issuer,
            group_ids: claims.groups.iter().flatten().cloned().collect(),
            app_role_claims: claims.roles.iter().flatten().cloned().collect(),
        })
    }
}

/// Outcome of a successful verification
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub principal: Principal,
    pub claims: TokenClaims,
}

#[derive(Debug, Deserialize)]
struct UnverifiedClaims {
    #[serde(default)]
    iss: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TestingCredentials {
    #[serde(default)]
    jwt_key: Option<String>,
}

/// Extract the token from an `Authorization` header value
pub fn parse_bearer(header: Option<&str>) -> Result<&str> {
    let header = header.ok_or_else(|| {
        AuthzError::Unauthenticated("Did not find bearer token in expected header.".to_string())
    })?;

    let (method, token) = header.split_once(' ').unwrap_or((header, ""));
    if method != "Bearer" {
        return Err(AuthzError::Unauthenticated(format!(
            "Did not find bearer token, found {} token.",
            method
        )));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthzError::Unauthenticated(
            "Did not find bearer token in expected header.".to_string(),
        ));
    }

    Ok(token)
}

/// Decodes and cryptographically verifies bearer tokens
pub struct TokenVerifier {
    run_environment: RunEnvironment,
    environment: EnvironmentConfig,
    jwks: Arc<dyn JwksResolver>,
    secrets: Arc<dyn SecretStore>,
    signing_key_override: Option<String>,
    /// Signing key read from the secret store, kept once found
    signing_key: OnceCell<String>,
    revocations: Option<Arc<dyn TokenRevocationList>>,
}

impl TokenVerifier {
    pub fn new(
        run_environment: RunEnvironment,
        environment: EnvironmentConfig,
        jwks: Arc<dyn JwksResolver>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            run_environment,
            environment,
            jwks,
            secrets,
            signing_key_override: None,
            signing_key: OnceCell::new(),
            revocations: None,
        }
    }

    /// Use this secret for custom tokens instead of the secret store
    pub fn with_signing_key_override(mut self, key: Option<String>) -> Self {
        self.signing_key_override = key.filter(|k| !k.is_empty());
        self
    }

    /// Reject tokens whose `uti` appears on this list
    pub fn with_revocation_list(mut self, revocations: Arc<dyn TokenRevocationList>) -> Self {
        self.revocations = Some(revocations);
        self
    }

    /// Verify the raw `Authorization` header value
    pub async fn verify(&self, header: Option<&str>) -> Result<VerifiedToken> {
        let token = parse_bearer(header)?;

        let (issuer, claims) = match Self::trust_path(token)? {
            TrustPath::Custom => (IssuerKind::Custom, self.verify_custom(token).await?),
            TrustPath::Aad { kid } => (IssuerKind::Aad, self.verify_aad(token, kid).await?),
        };

        let principal = Principal::from_claims(issuer, &claims)?;
        self.check_revocation(&principal, &claims).await?;

        Ok(VerifiedToken { principal, claims })
    }

    /// Inspect the token without verifying it to pick a trust path
    fn trust_path(token: &str) -> Result<TrustPath> {
        let header = decode_header(token)?;

        let mut validation = Validation::new(header.alg);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let unverified = decode::<UnverifiedClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;

        if unverified.claims.iss.as_deref() == Some(CUSTOM_ISSUER) {
            Ok(TrustPath::Custom)
        } else {
            Ok(TrustPath::Aad { kid: header.kid })
        }
    }

    async fn verify_custom(&self, token: &str) -> Result<TokenClaims> {
        if self.run_environment.is_production() {
            return Err(AuthzError::Unauthenticated(
                "Custom JWTs cannot be used in Prod environment.".to_string(),
            ));
        }

        let secret = self
            .custom_signing_key()
            .await?
            .ok_or_else(|| AuthzError::Unauthenticated(INVALID_TOKEN_MESSAGE.to_string()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;

        let data = decode::<TokenClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
        Ok(data.claims)
    }

    async fn custom_signing_key(&self) -> Result<Option<String>> {
        if let Some(key) = &self.signing_key_override {
            return Ok(Some(key.clone()));
        }
        if let Some(key) = self.signing_key.get() {
            return Ok(Some(key.clone()));
        }

        // Missing keys and store failures are not kept, so the next request retries
        let Some(key) = self.read_signing_key().await? else {
            return Ok(None);
        };
        debug!("Loaded custom token signing key from secret store");

        Ok(Some(self.signing_key.get_or_init(|| async { key }).await.clone()))
    }

    async fn read_signing_key(&self) -> Result<Option<String>> {
        let blob = match self.secrets.get_secret(TESTING_CREDENTIALS_SECRET).await? {
            Some(blob) => blob,
            None => return Ok(None),
        };

        // An unreadable secret is treated the same as a missing one
        let key = serde_json::from_slice::<TestingCredentials>(&blob)
            .ok()
            .and_then(|creds| creds.jwt_key)
            .filter(|key| !key.is_empty());

        Ok(key)
    }

    async fn verify_aad(&self, token: &str, kid: Option<String>) -> Result<TokenClaims> {
        let audience = self.environment.required_audience().ok_or_else(|| {
            error!("Server is misconfigured, could not find `aad_valid_client_id`!");
            AuthzError::InternalServerError(
                "Server authentication is misconfigured, please contact your administrator.".to_string(),
            )
        })?;

        let kid = kid.ok_or_else(|| {
            AuthzError::Unauthenticated("Could not decode token header.".to_string())
        })?;

        let key = self.jwks.signing_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        validation.set_audience(&[audience]);

        let data = decode::<TokenClaims>(token, &key, &validation)?;
        Ok(data.claims)
    }

    async fn check_revocation(&self, principal: &Principal, claims: &TokenClaims) -> Result<()> {
        let (Some(revocations), Some(token_id)) = (&self.revocations, claims.uti.as_deref()) else {
            return Ok(());
        };

        if revocations.is_revoked(token_id).await? {
            info!(username = %principal.username, token_id, "Revoked token was attempted");
            return Err(AuthzError::Unauthenticated(INVALID_TOKEN_MESSAGE.to_string()));
        }

        debug!(token_id, "Token is not revoked");
        Ok(())
    }
}
