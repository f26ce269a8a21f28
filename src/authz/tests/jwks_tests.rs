//! Remote key discovery tests against a mock JWKS endpoint

mod common;

use common::*;
use rolegate_authz::{AuthzError, InMemorySecretStore, JwksResolver, RemoteJwksResolver, RunEnvironment, TokenVerifier};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY_CACHE: Duration = Duration::from_secs(300);

async fn serve_jwks(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/discovery/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
        .mount(server)
        .await;
}

fn resolver(server: &MockServer, cache_ttl: Duration) -> RemoteJwksResolver {
    RemoteJwksResolver::new(format!("{}/discovery/keys", server.uri()), cache_ttl)
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map_or(0, |requests| requests.len())
}

fn assert_key_resolution<T>(result: rolegate_authz::Result<T>) {
    match result {
        Err(AuthzError::KeyResolution(_)) => {}
        Err(other) => panic!("expected KeyResolution, got {:?}", other),
        Ok(_) => panic!("expected KeyResolution, got a key"),
    }
}

// ============================================================================
// CACHING
// ============================================================================

#[tokio::test]
async fn test_second_lookup_is_served_from_cache() {
    let server = MockServer::start().await;
    serve_jwks(&server, JWKS_JSON).await;
    let resolver = resolver(&server, KEY_CACHE);

    assert!(resolver.signing_key(KID).await.is_ok());
    assert!(resolver.signing_key(KID).await.is_ok());

    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_document_is_refetched_after_cache_ttl() {
    let server = MockServer::start().await;
    serve_jwks(&server, JWKS_JSON).await;
    let resolver = resolver(&server, Duration::from_millis(200));

    assert!(resolver.signing_key(KID).await.is_ok());
    assert!(resolver.signing_key(KID).await.is_ok());
    assert_eq!(request_count(&server).await, 1);

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(resolver.signing_key(KID).await.is_ok());
    assert_eq!(request_count(&server).await, 2);
}

// ============================================================================
// UNKNOWN KEYS AND FAILURES
// ============================================================================

#[tokio::test]
async fn test_unknown_kid_fails_key_resolution() {
    let server = MockServer::start().await;
    serve_jwks(&server, JWKS_JSON).await;
    let resolver = resolver(&server, KEY_CACHE);

    assert_key_resolution(resolver.signing_key("rotated-away").await);
}

#[tokio::test]
async fn test_unknown_kids_do_not_refetch_within_interval() {
    let server = MockServer::start().await;
    serve_jwks(&server, JWKS_JSON).await;
    let resolver = resolver(&server, KEY_CACHE);

    assert!(resolver.signing_key(KID).await.is_ok());
    for i in 0..5 {
        assert_key_resolution(resolver.signing_key(&format!("forged-{}", i)).await);
    }

    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_rotated_key_is_found_after_refetch_interval() {
    let server = MockServer::start().await;
    serve_jwks(&server, r#"{"keys": []}"#).await;
    let resolver = resolver(&server, KEY_CACHE).with_refetch_interval(Duration::from_millis(100));

    assert_key_resolution(resolver.signing_key(KID).await);

    server.reset().await;
    serve_jwks(&server, JWKS_JSON).await;

    // Still inside the window: the new document is not fetched yet
    assert_key_resolution(resolver.signing_key(KID).await);
    assert_eq!(request_count(&server).await, 0);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(resolver.signing_key(KID).await.is_ok());
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_server_error_fails_key_resolution() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/discovery/keys"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let resolver = resolver(&server, KEY_CACHE);

    assert_key_resolution(resolver.signing_key(KID).await);
}

#[tokio::test]
async fn test_malformed_document_fails_key_resolution() {
    let server = MockServer::start().await;
    serve_jwks(&server, "<html>maintenance</html>").await;
    let resolver = resolver(&server, KEY_CACHE);

    assert_key_resolution(resolver.signing_key(KID).await);
}

// ============================================================================
// VERIFICATION
// ============================================================================

#[tokio::test]
async fn test_verifier_accepts_token_signed_with_fetched_key() {
    let server = MockServer::start().await;
    serve_jwks(&server, JWKS_JSON).await;

    let verifier = TokenVerifier::new(
        RunEnvironment::Prod,
        dev_environment(),
        Arc::new(resolver(&server, KEY_CACHE)),
        Arc::new(InMemorySecretStore::new()),
    );

    let token = aad_token(&aad_claims("alice@example.com", &["g1"], &[]));
    let verified = verifier.verify(Some(&bearer(&token))).await.unwrap();
    assert_eq!(verified.principal.username, "alice@example.com");

    let forged = sign_rs256(&aad_claims("alice@example.com", &[], &[]), Some("forged-kid"), OTHER_PRIVATE_PEM);
    assert!(matches!(
        verifier.verify(Some(&bearer(&forged))).await,
        Err(AuthzError::KeyResolution(_))
    ));

    assert_eq!(request_count(&server).await, 1);
}
