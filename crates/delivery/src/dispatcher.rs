//! Fan-out over the Connection Directory.
//!
//! The [`Dispatcher`] is the caller side of delivery: it resolves targets
//! from the directory, hands them to the [`DeliveryService`], and removes
//! every identifier that came back [`Stale`](DeliveryStatus::Stale).

use std::sync::Arc;

use bytes::Bytes;

use crate::{
    directory::ConnectionDirectory,
    error::Result,
    service::DeliveryService,
    transport::TransportEndpoint,
    types::{ConnectionId, DeliveryOutcome, DeliveryStatus},
};

/// Summary of one dispatch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// One outcome per attempted connection, in target order.
    pub outcomes: Vec<DeliveryOutcome>,
    /// Stale identifiers removed from the directory.
    pub removed: Vec<ConnectionId>,
    /// Requested identifiers with no live directory record; not attempted.
    pub skipped: Vec<ConnectionId>,
}

impl DispatchReport {
    /// Number of successful deliveries.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.count(DeliveryStatus::is_delivered)
    }

    /// Number of stale connections.
    #[must_use]
    pub fn stale(&self) -> usize {
        self.count(DeliveryStatus::is_stale)
    }

    /// Number of transport failures.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, DeliveryStatus::TransportError { .. }))
    }

    fn count(&self, predicate: impl Fn(&DeliveryStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.status)).count()
    }
}

/// Sends payloads to directory-registered connections.
#[derive(Clone)]
pub struct Dispatcher {
    service: DeliveryService,
    directory: Arc<dyn ConnectionDirectory>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("service", &self.service).finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(service: DeliveryService, directory: Arc<dyn ConnectionDirectory>) -> Self {
        Self { service, directory }
    }

    /// Returns the directory.
    #[must_use]
    pub fn directory(&self) -> &Arc<dyn ConnectionDirectory> {
        &self.directory
    }

    /// Sends `payload` to the given connections.
    ///
    /// Identifiers without a live directory record are reported as skipped
    /// and not attempted.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Directory`](crate::DeliveryError::Directory)
    /// if target lookup fails. Send failures are reported in the
    /// [`DispatchReport`], never as an error.
    #[tracing::instrument(skip_all, fields(requested = connection_ids.len()))]
    pub async fn send_to(
        &self,
        connection_ids: &[ConnectionId],
        payload: Bytes,
        endpoint: &TransportEndpoint,
    ) -> Result<DispatchReport> {
        let mut targets = Vec::with_capacity(connection_ids.len());
        let mut skipped = Vec::new();
        for connection_id in connection_ids {
            if self.directory.get(connection_id).await?.is_some() {
                targets.push(connection_id.clone());
            } else {
                skipped.push(connection_id.clone());
            }
        }

        let mut report = self.dispatch(&targets, payload, endpoint).await;
        report.skipped = skipped;
        Ok(report)
    }

    /// Sends `payload` to every live connection.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Directory`](crate::DeliveryError::Directory)
    /// if listing fails.
    #[tracing::instrument(skip_all)]
    pub async fn broadcast(&self, payload: Bytes, endpoint: &TransportEndpoint) -> Result<DispatchReport> {
        let targets: Vec<ConnectionId> =
            self.directory.list_live().await?.into_iter().map(|r| r.connection_id).collect();
        Ok(self.dispatch(&targets, payload, endpoint).await)
    }

    async fn dispatch(
        &self,
        targets: &[ConnectionId],
        payload: Bytes,
        endpoint: &TransportEndpoint,
    ) -> DispatchReport {
        let outcomes = self.service.deliver_all(targets, payload, endpoint).await;

        let mut removed = Vec::new();
        for outcome in outcomes.iter().filter(|o| o.status.is_stale()) {
            match self.directory.remove(&outcome.connection_id).await {
                Ok(_) => removed.push(outcome.connection_id.clone()),
                Err(err) => tracing::warn!(
                    connection_id = %outcome.connection_id,
                    error = %err,
                    "failed to remove stale connection"
                ),
            }
        }

        let report = DispatchReport { outcomes, removed, skipped: Vec::new() };
        tracing::info!(
            delivered = report.delivered(),
            stale = report.stale(),
            failed = report.failed(),
            "dispatch complete"
        );
        report
    }
}
