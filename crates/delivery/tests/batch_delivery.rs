#![allow(clippy::expect_used, clippy::panic)]
//! Batch delivery against the in-memory directory and transport.

use std::sync::Arc;

use bytes::Bytes;
use wsgate_delivery::{
    ConnectionDirectory, ConnectionId, DeliveryConfig, DeliveryService, DeliveryStatus,
    Dispatcher, MemoryConnectionDirectory,
    testutil::{MemoryTransport, record, test_endpoint},
};

#[tokio::test]
async fn batch_with_one_stale_connection() {
    let transport = MemoryTransport::new();
    let directory = MemoryConnectionDirectory::new();
    for id in ["alpha", "bravo", "charlie"] {
        directory.put(record(id)).await.expect("put");
    }
    transport.mark_gone("bravo");

    let service = DeliveryService::new(Arc::new(transport.clone()), DeliveryConfig::default());
    let dispatcher = Dispatcher::new(service, Arc::new(directory.clone()));
    let ids: Vec<ConnectionId> =
        ["alpha", "bravo", "charlie"].into_iter().map(ConnectionId::from).collect();

    let report = dispatcher
        .send_to(&ids, Bytes::from_static(b"{\"message\":\"hi\"}"), &test_endpoint())
        .await
        .expect("dispatch");

    let statuses: Vec<(&str, &DeliveryStatus)> =
        report.outcomes.iter().map(|o| (o.connection_id.as_str(), &o.status)).collect();
    assert_eq!(
        statuses,
        vec![
            ("alpha", &DeliveryStatus::Delivered),
            ("bravo", &DeliveryStatus::Stale),
            ("charlie", &DeliveryStatus::Delivered),
        ]
    );
    assert_eq!(report.removed, vec![ConnectionId::from("bravo")]);

    let live: Vec<ConnectionId> = directory
        .list_live()
        .await
        .expect("list")
        .into_iter()
        .map(|r| r.connection_id)
        .collect();
    assert_eq!(live, vec![ConnectionId::from("alpha"), ConnectionId::from("charlie")]);
}

#[tokio::test]
async fn second_broadcast_skips_removed_connection() {
    let transport = MemoryTransport::new();
    let directory = MemoryConnectionDirectory::new();
    for id in ["alpha", "bravo"] {
        directory.put(record(id)).await.expect("put");
    }
    transport.mark_gone("alpha");

    let service = DeliveryService::new(Arc::new(transport.clone()), DeliveryConfig::default());
    let dispatcher = Dispatcher::new(service, Arc::new(directory));

    let first = dispatcher.broadcast(Bytes::from_static(b"1"), &test_endpoint()).await.expect("first");
    assert_eq!((first.delivered(), first.stale()), (1, 1));

    let second =
        dispatcher.broadcast(Bytes::from_static(b"2"), &test_endpoint()).await.expect("second");
    assert_eq!((second.delivered(), second.stale()), (1, 0));
    assert_eq!(transport.send_count(), 3);
}
