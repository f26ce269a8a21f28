//! Shared fixtures: token minting and a wired-up gate over in-memory stores

#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashSet;
use jsonwebtoken::{encode, get_current_timestamp, Algorithm, EncodingKey, Header};
use rolegate_authz::{
    ApiKeyAuthenticator, AuthorizationGate, AuthzError, DecisionCache, EnvironmentConfig,
    GroupRoleStore, InMemoryApiKeyStore, InMemoryRevocationList, InMemoryRoleStore,
    InMemorySecretStore, RoleRecord, RoleResolver, RunEnvironment, StaticJwksResolver,
    TokenVerifier,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub const KID: &str = "rolegate-test-key";
pub const CLIENT_ID: &str = "39c28870-94e4-47ee-b4fb-affe0bf96c9f";
pub const DEV_SECRET: &str = "dev-signing-secret";

pub const PRIVATE_PEM: &[u8] = include_bytes!("../fixtures/rsa_private.pem");
pub const PUBLIC_PEM: &[u8] = include_bytes!("../fixtures/rsa_public.pem");
pub const OTHER_PRIVATE_PEM: &[u8] = include_bytes!("../fixtures/other_private.pem");

/// JWKS document exposing the fixture public key under [`KID`]
pub const JWKS_JSON: &str = r#"{
    "keys": [{
        "kty": "RSA",
        "use": "sig",
        "alg": "RS256",
        "kid": "rolegate-test-key",
        "n": "l3XGkMoy3aa1CObYot9FPTQ1jHI7d4CJkh1vuWXUJxxPlIot2wjxbMgqz7V-_uW73bA3RNuWlYRqWzD8gk2rZ-g9bniNeEGXeJ0xe7hSZ9MtfG5qiJyO1huhxWAuYYG7hap9aivh0zt7nZfeJbtIqoqWMHLF3aiR5OEM2JhzSx-zulOMM65oeAR8eCYCq2QXoKbTcwIUDPtMu1EnE6Gti6yE3OYx25tiLwWYo1DHBOhxSBO_vfTr1a2vxqVe4H7BVgzTt6BGfX-zwhFI_NZPgsRr0fHMI4VIDO41HjojUxOid2_1cDHvFzVG4ExeBG3RyhWtkLeqXEVWrsauLnVT5Q",
        "e": "AQAB"
    }]
}"#;

pub fn in_one_hour() -> u64 {
    get_current_timestamp() + 3600
}

/// Claims of an identity-provider token with the expected audience
pub fn aad_claims(email: &str, groups: &[&str], roles: &[&str]) -> Value {
    json!({
        "iss": "https://sts.windows.net/tenant/",
        "aud": format!("api://{}", CLIENT_ID),
        "sub": "aad-subject",
        "email": email,
        "groups": groups,
        "roles": roles,
        "exp": in_one_hour(),
    })
}

/// Claims of a custom token
pub fn custom_claims(email: &str, groups: &[&str], roles: &[&str]) -> Value {
    json!({
        "iss": "custom_jwt",
        "aud": "custom_jwt",
        "sub": email,
        "email": email,
        "groups": groups,
        "roles": roles,
        "exp": in_one_hour(),
    })
}

pub fn sign_rs256(claims: &Value, kid: Option<&str>, private_pem: &[u8]) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(private_pem).unwrap();
    encode(&header, claims, &key).unwrap()
}

pub fn aad_token(claims: &Value) -> String {
    sign_rs256(claims, Some(KID), PRIVATE_PEM)
}

pub fn custom_token(claims: &Value, secret: &str) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

pub fn dev_environment() -> EnvironmentConfig {
    let mut azure_role_mapping = HashMap::new();
    azure_role_mapping.insert("AutonomousWriters".to_string(), vec!["manage:events".to_string()]);

    EnvironmentConfig {
        aad_valid_client_id: Some(CLIENT_ID.to_string()),
        azure_role_mapping,
    }
}

/// Group store that fails for selected group ids
#[derive(Default)]
pub struct FlakyGroupStore {
    pub inner: InMemoryRoleStore,
    failing: DashSet<String>,
}

impl FlakyGroupStore {
    pub fn fail_on(&self, group_id: &str) {
        self.failing.insert(group_id.to_string());
    }
}

#[async_trait]
impl GroupRoleStore for FlakyGroupStore {
    async fn get(&self, group_id: &str) -> rolegate_authz::Result<Option<RoleRecord>> {
        if self.failing.contains(group_id) {
            return Err(AuthzError::Store(format!("group table unavailable for {}", group_id)));
        }
        GroupRoleStore::get(&self.inner, group_id).await
    }
}

/// Every collaborator of a gate, kept reachable for seeding and assertions
pub struct Harness {
    pub cache: Arc<DecisionCache>,
    pub users: Arc<InMemoryRoleStore>,
    pub groups: Arc<FlakyGroupStore>,
    pub secrets: Arc<InMemorySecretStore>,
    pub revocations: Arc<InMemoryRevocationList>,
    pub api_keys: Arc<InMemoryApiKeyStore>,
    pub gate: AuthorizationGate,
}

pub struct HarnessBuilder {
    run_environment: RunEnvironment,
    environment: EnvironmentConfig,
    signing_key_override: Option<String>,
}

impl HarnessBuilder {
    pub fn new(run_environment: RunEnvironment) -> Self {
        Self {
            run_environment,
            environment: dev_environment(),
            signing_key_override: Some(DEV_SECRET.to_string()),
        }
    }

    pub fn environment(mut self, environment: EnvironmentConfig) -> Self {
        self.environment = environment;
        self
    }

    pub fn signing_key_override(mut self, key: Option<&str>) -> Self {
        self.signing_key_override = key.map(str::to_string);
        self
    }

    pub fn build(self) -> Harness {
        let cache = Arc::new(DecisionCache::new());
        let users = Arc::new(InMemoryRoleStore::new());
        let groups = Arc::new(FlakyGroupStore::default());
        let secrets = Arc::new(InMemorySecretStore::new());
        let revocations = Arc::new(InMemoryRevocationList::new());
        let api_keys = Arc::new(InMemoryApiKeyStore::new());

        let jwks = StaticJwksResolver::new().with_rsa_pem(KID, PUBLIC_PEM).unwrap();

        let verifier = TokenVerifier::new(
            self.run_environment,
            self.environment.clone(),
            Arc::new(jwks),
            secrets.clone(),
        )
        .with_signing_key_override(self.signing_key_override)
        .with_revocation_list(revocations.clone());

        let resolver = RoleResolver::new(cache.clone(), users.clone(), groups.clone())
            .with_azure_role_mapping(self.environment.azure_role_mapping);

        let gate = AuthorizationGate::new(Arc::new(verifier), Arc::new(resolver))
            .with_api_keys(Arc::new(ApiKeyAuthenticator::new(api_keys.clone())));

        Harness {
            cache,
            users,
            groups,
            secrets,
            revocations,
            api_keys,
            gate,
        }
    }
}

pub fn dev_harness() -> Harness {
    HarnessBuilder::new(RunEnvironment::Dev).build()
}

pub fn prod_harness() -> Harness {
    HarnessBuilder::new(RunEnvironment::Prod).build()
}
