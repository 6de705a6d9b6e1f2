#![cfg(feature = "failpoints")]
#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection around the transport send.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p wsgate-delivery --features failpoints --test failpoint_tests
//! ```

use std::sync::Arc;

use bytes::Bytes;
use wsgate_delivery::{
    ConnectionId, DeliveryConfig, DeliveryService, DeliveryStatus,
    testutil::{MemoryTransport, test_endpoint},
};

fn service(transport: &MemoryTransport) -> DeliveryService {
    DeliveryService::new(Arc::new(transport.clone()), DeliveryConfig::default())
}

#[tokio::test]
async fn transport_send_failpoint_yields_transport_error() {
    let scenario = fail::FailScenario::setup();
    let transport = MemoryTransport::new();

    fail::cfg("transport-before-send", "return").expect("failed to configure fail point");

    let outcome = service(&transport)
        .deliver(&ConnectionId::from("c1"), Bytes::from_static(b"hi"), &test_endpoint())
        .await;
    assert!(
        matches!(outcome.status, DeliveryStatus::TransportError { .. }),
        "got {outcome:?}"
    );
    assert_eq!(transport.send_count(), 0, "transport must not be reached");

    scenario.teardown();
}

#[tokio::test]
async fn transport_send_without_failpoint_succeeds() {
    let scenario = fail::FailScenario::setup();
    let transport = MemoryTransport::new();

    let outcome = service(&transport)
        .deliver(&ConnectionId::from("c1"), Bytes::from_static(b"hi"), &test_endpoint())
        .await;
    assert_eq!(outcome.status, DeliveryStatus::Delivered);

    scenario.teardown();
}

#[tokio::test]
async fn injected_failure_does_not_abort_batch() {
    let scenario = fail::FailScenario::setup();
    let transport = MemoryTransport::new();
    let ids: Vec<ConnectionId> = ["a", "b", "c"].into_iter().map(ConnectionId::from).collect();

    fail::cfg("transport-before-send", "1*return").expect("failed to configure fail point");

    let outcomes =
        service(&transport).deliver_all(&ids, Bytes::from_static(b"hi"), &test_endpoint()).await;
    assert_eq!(outcomes.len(), 3);
    let failed = outcomes.iter().filter(|o| !o.status.is_delivered()).count();
    assert_eq!(failed, 1);
    assert_eq!(transport.send_count(), 2);

    scenario.teardown();
}
