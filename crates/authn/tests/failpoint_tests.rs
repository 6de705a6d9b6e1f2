#![cfg(feature = "failpoints")]
#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection around the key-set fetch.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p wsgate-authn --features failpoints --test failpoint_tests
//! ```

use std::sync::Arc;

use wsgate_authn::{
    AuthStage, AuthenticationResult, FailureCategory, HandshakeRequest, KeyResolver,
    TokenAuthenticator,
    testutil::{
        StaticKeySetSource, TEST_KID, TestKey, create_signed_token, handshake_event, key_set,
        standard_claims, test_config,
    },
};

fn setup() -> (Arc<KeyResolver>, Arc<StaticKeySetSource>) {
    let source = Arc::new(StaticKeySetSource::new(key_set(&[(TEST_KID, TestKey::A)])));
    let resolver = Arc::new(KeyResolver::from_config(source.clone(), &test_config()));
    (resolver, source)
}

#[tokio::test]
async fn key_set_fetch_failpoint_returns_error() {
    let scenario = fail::FailScenario::setup();
    let (resolver, source) = setup();

    fail::cfg("key-set-before-fetch", "return").expect("failed to configure fail point");

    let result = resolver.resolve_key(TEST_KID).await;
    assert!(result.is_err(), "resolution should fail when fail point is active");
    assert_eq!(source.fetch_count(), 0, "source must not be reached");
    assert_eq!(resolver.metrics_snapshot().fetch_failures, 1);

    scenario.teardown();
}

#[tokio::test]
async fn key_set_fetch_without_failpoint_succeeds() {
    let scenario = fail::FailScenario::setup();
    let (resolver, source) = setup();

    let result = resolver.resolve_key(TEST_KID).await;
    assert!(result.is_ok(), "resolution should succeed without fail point");
    assert_eq!(source.fetch_count(), 1);

    scenario.teardown();
}

#[tokio::test]
async fn injected_failure_is_not_cached() {
    let scenario = fail::FailScenario::setup();
    let (resolver, source) = setup();

    fail::cfg("key-set-before-fetch", "return").expect("failed to configure fail point");
    assert!(resolver.resolve_key(TEST_KID).await.is_err());

    fail::remove("key-set-before-fetch");
    assert!(resolver.resolve_key(TEST_KID).await.is_ok());
    assert_eq!(source.fetch_count(), 1);

    scenario.teardown();
}

#[tokio::test]
async fn injected_failure_denies_handshake_as_transient() {
    let scenario = fail::FailScenario::setup();
    let (resolver, _) = setup();
    let authenticator = TokenAuthenticator::new(&test_config(), resolver);
    let token = create_signed_token(&standard_claims("user-1", "chat:write"), TEST_KID, TestKey::A);
    let request = HandshakeRequest::from_value(handshake_event(Some(&token))).expect("fixture");

    fail::cfg("key-set-before-fetch", "return").expect("failed to configure fail point");

    match authenticator.authenticate(&request).await {
        AuthenticationResult::Deny(reason) => {
            assert_eq!(reason.stage, AuthStage::KeyResolution);
            assert_eq!(reason.category, FailureCategory::Transient);
        },
        AuthenticationResult::Allow(_) => panic!("handshake must be denied"),
    }

    scenario.teardown();
}
