//! Connection Directory: the set of currently live connection identifiers.
//!
//! The directory is written when a connection is admitted and read when
//! messages fan out. Delivery treats it as advisory: a record may point at
//! a connection that is already gone, which the delivery outcome reveals as
//! [`Stale`](crate::DeliveryStatus::Stale).
//!
//! # Expiry
//!
//! Records carry an optional `expires_at`. Expiry is lazy: an expired record
//! is invisible to [`get`](ConnectionDirectory::get) and
//! [`list_live`](ConnectionDirectory::list_live) but only physically removed
//! by [`remove`](ConnectionDirectory::remove) or
//! [`MemoryConnectionDirectory::purge_expired`].

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::{
    error::Result,
    types::{ConnectionId, ConnectionRecord},
};

/// Storage for live connection records.
#[async_trait]
pub trait ConnectionDirectory: Send + Sync {
    /// Inserts or replaces the record for its connection.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Directory`](crate::DeliveryError::Directory)
    /// if the backing store fails.
    async fn put(&self, record: ConnectionRecord) -> Result<()>;

    /// Returns the live record for `connection_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Directory`](crate::DeliveryError::Directory)
    /// if the backing store fails.
    async fn get(&self, connection_id: &ConnectionId) -> Result<Option<ConnectionRecord>>;

    /// Removes the record for `connection_id`. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Directory`](crate::DeliveryError::Directory)
    /// if the backing store fails.
    async fn remove(&self, connection_id: &ConnectionId) -> Result<bool>;

    /// Returns every unexpired record, ordered by connection id.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Directory`](crate::DeliveryError::Directory)
    /// if the backing store fails.
    async fn list_live(&self) -> Result<Vec<ConnectionRecord>>;
}

/// In-memory directory for tests and local runs.
///
/// Cheaply cloneable; clones share the same records.
#[derive(Clone, Debug, Default)]
pub struct MemoryConnectionDirectory {
    records: Arc<RwLock<BTreeMap<ConnectionId, ConnectionRecord>>>,
}

impl MemoryConnectionDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Physically removes every expired record. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| record.is_live_at(now));
        let purged = before - records.len();
        if purged > 0 {
            tracing::debug!(purged, "expired connection records purged");
        }
        purged
    }

    /// Number of stored records, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl ConnectionDirectory for MemoryConnectionDirectory {
    async fn put(&self, record: ConnectionRecord) -> Result<()> {
        self.records.write().insert(record.connection_id.clone(), record);
        Ok(())
    }

    async fn get(&self, connection_id: &ConnectionId) -> Result<Option<ConnectionRecord>> {
        let now = Utc::now();
        Ok(self.records.read().get(connection_id).filter(|r| r.is_live_at(now)).cloned())
    }

    async fn remove(&self, connection_id: &ConnectionId) -> Result<bool> {
        Ok(self.records.write().remove(connection_id).is_some())
    }

    async fn list_live(&self) -> Result<Vec<ConnectionRecord>> {
        let now = Utc::now();
        Ok(self.records.read().values().filter(|r| r.is_live_at(now)).cloned().collect())
    }
}
