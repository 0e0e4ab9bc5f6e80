//! Shipment store wrapper that injects failures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::shipment::{
    CreateShipmentRequest, Shipment, ShipmentError, ShipmentFilter, ShipmentPatch, ShipmentStatus,
    ShipmentStore, SqliteShipmentStore, StatusTransition,
};

/// Kind of failure to inject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreFailure {
    /// Fails with `ShipmentError::Database` (transient).
    Database(String),
    /// Fails with `ShipmentError::InvalidData` (permanent).
    InvalidData(String),
}

impl StoreFailure {
    fn to_error(&self, id: i64) -> ShipmentError {
        match self {
            StoreFailure::Database(msg) => ShipmentError::Database(msg.clone()),
            StoreFailure::InvalidData(reason) => ShipmentError::InvalidData {
                id,
                reason: reason.clone(),
            },
        }
    }
}

/// Delegates to a real store and fails reads or status writes on demand.
///
/// Also counts `transition_status` calls, so tests can assert that a step
/// performed no write.
pub struct FailingShipmentStore {
    inner: Arc<dyn ShipmentStore>,
    read_failure: RwLock<Option<StoreFailure>>,
    write_failure: RwLock<Option<StoreFailure>>,
    transition_calls: AtomicUsize,
}

impl FailingShipmentStore {
    /// Wrap an existing store.
    pub fn new(inner: Arc<dyn ShipmentStore>) -> Self {
        Self {
            inner,
            read_failure: RwLock::new(None),
            write_failure: RwLock::new(None),
            transition_calls: AtomicUsize::new(0),
        }
    }

    /// Wrap a fresh in-memory SQLite store.
    pub fn in_memory() -> Result<Self, ShipmentError> {
        Ok(Self::new(Arc::new(SqliteShipmentStore::in_memory()?)))
    }

    /// Make `get` fail until cleared.
    pub fn fail_reads(&self, failure: Option<StoreFailure>) {
        *self
            .read_failure
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = failure;
    }

    /// Make `transition_status` and `update` fail until cleared.
    pub fn fail_writes(&self, failure: Option<StoreFailure>) {
        *self
            .write_failure
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = failure;
    }

    /// Number of `transition_status` calls seen, including failed ones.
    pub fn transition_calls(&self) -> usize {
        self.transition_calls.load(Ordering::SeqCst)
    }

    fn read_error(&self, id: i64) -> Option<ShipmentError> {
        self.read_failure
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|f| f.to_error(id))
    }

    fn write_error(&self, id: i64) -> Option<ShipmentError> {
        self.write_failure
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|f| f.to_error(id))
    }
}

impl ShipmentStore for FailingShipmentStore {
    fn create(&self, request: CreateShipmentRequest) -> Result<Shipment, ShipmentError> {
        self.inner.create(request)
    }

    fn get(&self, id: i64) -> Result<Option<Shipment>, ShipmentError> {
        if let Some(err) = self.read_error(id) {
            return Err(err);
        }
        self.inner.get(id)
    }

    fn list(&self, filter: &ShipmentFilter) -> Result<Vec<Shipment>, ShipmentError> {
        self.inner.list(filter)
    }

    fn count(&self, filter: &ShipmentFilter) -> Result<i64, ShipmentError> {
        self.inner.count(filter)
    }

    fn update(&self, id: i64, patch: ShipmentPatch) -> Result<Shipment, ShipmentError> {
        if let Some(err) = self.write_error(id) {
            return Err(err);
        }
        self.inner.update(id, patch)
    }

    fn delete(&self, id: i64) -> Result<Shipment, ShipmentError> {
        self.inner.delete(id)
    }

    fn transition_status(
        &self,
        id: i64,
        expected: Option<ShipmentStatus>,
        new: ShipmentStatus,
    ) -> Result<StatusTransition, ShipmentError> {
        self.transition_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.write_error(id) {
            return Err(err);
        }
        self.inner.transition_status(id, expected, new)
    }

    fn list_stale_tracked(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Shipment>, ShipmentError> {
        self.inner.list_stale_tracked(before, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injected_write_failure() {
        let store = FailingShipmentStore::in_memory().unwrap();
        let shipment = store
            .create(CreateShipmentRequest {
                tracking_number: Some("T".to_string()),
                ..Default::default()
            })
            .unwrap();

        store.fail_writes(Some(StoreFailure::Database("disk I/O error".to_string())));
        let err = store
            .transition_status(shipment.id, None, ShipmentStatus::Pending)
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.transition_calls(), 1);

        store.fail_writes(None);
        assert!(matches!(
            store
                .transition_status(shipment.id, None, ShipmentStatus::Pending)
                .unwrap(),
            StatusTransition::Applied(_)
        ));
    }

    #[test]
    fn test_injected_read_failure() {
        let store = FailingShipmentStore::in_memory().unwrap();
        store.fail_reads(Some(StoreFailure::InvalidData("bad row".to_string())));

        let err = store.get(1).unwrap_err();
        assert!(!err.is_transient());
        assert!(matches!(err, ShipmentError::InvalidData { id: 1, .. }));
    }
}
