//! Tracking step and trigger operations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::jobs::{JobId, JobRequest, JobScheduler};
use crate::metrics;
use crate::shipment::{ShipmentStore, StatusTransition};

use super::config::TrackingConfig;
use super::state_machine::next_status;
use super::types::{FollowUp, StepResult, TrackingError};

/// Advances shipment statuses and keeps each shipment's job chain alive.
///
/// Depends only on the store and scheduler traits; nothing here knows how
/// jobs are persisted or executed.
pub struct TrackingService {
    store: Arc<dyn ShipmentStore>,
    scheduler: Arc<dyn JobScheduler>,
    config: TrackingConfig,
}

impl TrackingService {
    pub fn new(
        store: Arc<dyn ShipmentStore>,
        scheduler: Arc<dyn JobScheduler>,
        config: TrackingConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            config,
        }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ShipmentStore> {
        &self.store
    }

    /// Run one tracking step for a shipment.
    ///
    /// Never fails: every outcome, including storage errors, is a
    /// [`StepResult`]. A follow-up step is queued only when the status moved
    /// to a non-terminal value.
    pub async fn run_step(&self, shipment_id: i64) -> StepResult {
        let start = Instant::now();
        let result = self.execute_step(shipment_id).await;

        let label = result.label();
        metrics::STEPS_TOTAL.with_label_values(&[label]).inc();
        metrics::STEP_DURATION
            .with_label_values(&[label])
            .observe(start.elapsed().as_secs_f64());

        result
    }

    async fn execute_step(&self, shipment_id: i64) -> StepResult {
        let shipment = match self.store.get(shipment_id) {
            Ok(Some(shipment)) => shipment,
            Ok(None) => {
                warn!("Shipment {} not found, stopping tracking", shipment_id);
                return StepResult::NotFound { shipment_id };
            }
            Err(e) => {
                error!("Failed to load shipment {}: {}", shipment_id, e);
                return StepResult::from_store_error(shipment_id, &e);
            }
        };

        if !shipment.has_tracking_number() {
            debug!("Shipment {} has no tracking number, skipping", shipment_id);
            return StepResult::NoTracking { shipment_id };
        }

        let current = shipment.status;
        if let Some(status) = current.filter(|s| s.is_terminal()) {
            info!(
                "Shipment {} already in terminal status {}, stopping tracking",
                shipment_id, status
            );
            return StepResult::Terminal {
                shipment_id,
                current_status: status,
            };
        }

        let new_status = next_status(current, true);

        match self.store.transition_status(shipment_id, current, new_status) {
            Ok(StatusTransition::Applied(_)) => {}
            Ok(StatusTransition::Conflict { found }) => {
                warn!(
                    "Shipment {} status changed concurrently (expected {:?}, found {:?}), skipping",
                    shipment_id, current, found
                );
                return StepResult::Conflict {
                    shipment_id,
                    expected: current,
                    found,
                };
            }
            Ok(StatusTransition::NotFound) => {
                warn!("Shipment {} disappeared before status write", shipment_id);
                return StepResult::NotFound { shipment_id };
            }
            Err(e) => {
                error!("Failed to update status of shipment {}: {}", shipment_id, e);
                return StepResult::from_store_error(shipment_id, &e);
            }
        }

        metrics::STATUS_TRANSITIONS
            .with_label_values(&[new_status.as_str()])
            .inc();
        info!(
            "Shipment {} status: {} -> {}",
            shipment_id,
            current.map(|s| s.as_str()).unwrap_or("none"),
            new_status
        );

        let follow_up = if new_status.is_terminal() {
            info!("Shipment {} reached terminal status {}", shipment_id, new_status);
            FollowUp::NotNeeded
        } else {
            self.schedule_follow_up(shipment_id).await
        };

        StepResult::Updated {
            shipment_id,
            old_status: current,
            new_status,
            follow_up,
        }
    }

    async fn schedule_follow_up(&self, shipment_id: i64) -> FollowUp {
        let delay = self.config.follow_up_delay();
        match self
            .scheduler
            .enqueue(JobRequest::tracking_step(shipment_id, delay))
            .await
        {
            Ok(job_id) => {
                metrics::FOLLOW_UPS_SCHEDULED.inc();
                debug!(
                    "Scheduled next tracking step for shipment {} as job {} in {:?}",
                    shipment_id, job_id, delay
                );
                FollowUp::Scheduled { job_id }
            }
            Err(e) => {
                metrics::FOLLOW_UP_ENQUEUE_FAILURES.inc();
                error!(
                    "Status of shipment {} was written but the next tracking step could not be queued: {}",
                    shipment_id, e
                );
                FollowUp::EnqueueFailed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Queue a tracking step for a shipment after `delay`.
    ///
    /// Fails without queueing anything if the shipment does not exist or has
    /// no tracking number. A step already queued for the shipment is reused,
    /// so repeated kickoffs never start a second chain.
    pub async fn request_kickoff(
        &self,
        shipment_id: i64,
        delay: Duration,
    ) -> Result<JobId, TrackingError> {
        let result = self.kickoff(shipment_id, delay).await;

        let label = match &result {
            Ok(_) => "queued",
            Err(TrackingError::NotFound(_)) => "not_found",
            Err(TrackingError::NoTrackingNumber(_)) => "no_tracking",
            Err(TrackingError::ServiceUnavailable(_)) => "unavailable",
            Err(_) => "error",
        };
        metrics::KICKOFFS.with_label_values(&[label]).inc();

        result
    }

    async fn kickoff(&self, shipment_id: i64, delay: Duration) -> Result<JobId, TrackingError> {
        let shipment = self
            .store
            .get(shipment_id)?
            .ok_or(TrackingError::NotFound(shipment_id))?;

        if !shipment.has_tracking_number() {
            return Err(TrackingError::NoTrackingNumber(shipment_id));
        }

        let job_id = self
            .scheduler
            .enqueue(JobRequest::tracking_step(shipment_id, delay))
            .await?;

        info!(
            "Queued tracking for shipment {} as job {} in {:?}",
            shipment_id, job_id, delay
        );
        Ok(job_id)
    }

    /// Queue an immediate tracking step.
    pub async fn trigger_now(&self, shipment_id: i64) -> Result<JobId, TrackingError> {
        self.request_kickoff(shipment_id, Duration::ZERO).await
    }

    /// Start tracking after a shipment was created or edited.
    ///
    /// Uses the configured kickoff delay. Failures are logged and swallowed so
    /// the write that triggered them still succeeds.
    pub async fn kickoff_after_change(&self, shipment_id: i64) -> Option<JobId> {
        match self
            .request_kickoff(shipment_id, self.config.kickoff_delay())
            .await
        {
            Ok(job_id) => Some(job_id),
            Err(e) => {
                warn!("Could not start tracking for shipment {}: {}", shipment_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobKind, SchedulerError};
    use crate::shipment::{
        CreateShipmentRequest, Shipment, ShipmentError, ShipmentFilter, ShipmentPatch,
        ShipmentStatus, SqliteShipmentStore,
    };
    use crate::testing::fixtures::{tracked_shipment, untracked_shipment};
    use crate::testing::{FailingShipmentStore, MockJobScheduler, StoreFailure};
    use chrono::{DateTime, Utc};

    struct Fixture {
        store: Arc<FailingShipmentStore>,
        scheduler: Arc<MockJobScheduler>,
        service: TrackingService,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(FailingShipmentStore::in_memory().unwrap());
            let scheduler = Arc::new(MockJobScheduler::new());
            let service = TrackingService::new(
                store.clone(),
                scheduler.clone(),
                TrackingConfig::default(),
            );
            Self {
                store,
                scheduler,
                service,
            }
        }

        fn create(&self, request: CreateShipmentRequest) -> Shipment {
            self.store.create(request).unwrap()
        }

        fn status_of(&self, id: i64) -> Option<ShipmentStatus> {
            self.store.get(id).unwrap().unwrap().status
        }
    }

    #[tokio::test]
    async fn test_step_not_found() {
        let fx = Fixture::new();

        let result = fx.service.run_step(404).await;

        assert_eq!(result, StepResult::NotFound { shipment_id: 404 });
        assert_eq!(fx.store.transition_calls(), 0);
        assert_eq!(fx.scheduler.enqueue_count().await, 0);
    }

    #[tokio::test]
    async fn test_step_on_deleted_shipment_is_not_found() {
        let fx = Fixture::new();
        let shipment = fx.create(tracked_shipment("T", Some(ShipmentStatus::Processing)));
        fx.store.delete(shipment.id).unwrap();

        let result = fx.service.run_step(shipment.id).await;

        assert_eq!(result, StepResult::NotFound { shipment_id: shipment.id });
        assert_eq!(fx.scheduler.enqueue_count().await, 0);
    }

    #[tokio::test]
    async fn test_step_no_tracking_number() {
        let fx = Fixture::new();
        let missing = fx.create(untracked_shipment(Some(ShipmentStatus::Processing)));
        let empty = fx.create(tracked_shipment("", Some(ShipmentStatus::Processing)));

        for id in [missing.id, empty.id] {
            let result = fx.service.run_step(id).await;
            assert_eq!(result, StepResult::NoTracking { shipment_id: id });
            assert_eq!(fx.status_of(id), Some(ShipmentStatus::Processing));
        }
        assert_eq!(fx.store.transition_calls(), 0);
        assert_eq!(fx.scheduler.enqueue_count().await, 0);
    }

    #[tokio::test]
    async fn test_step_terminal_is_noop() {
        let fx = Fixture::new();

        for status in [
            ShipmentStatus::Delivered,
            ShipmentStatus::Cancelled,
            ShipmentStatus::Failed,
        ] {
            let shipment = fx.create(tracked_shipment("T", Some(status)));
            let result = fx.service.run_step(shipment.id).await;

            assert_eq!(
                result,
                StepResult::Terminal {
                    shipment_id: shipment.id,
                    current_status: status,
                }
            );
            let stored = fx.store.get(shipment.id).unwrap().unwrap();
            assert_eq!(stored.status, Some(status));
            assert!(stored.updated_at.is_none());
        }
        assert_eq!(fx.store.transition_calls(), 0);
        assert_eq!(fx.scheduler.enqueue_count().await, 0);
    }

    #[tokio::test]
    async fn test_step_advances_and_schedules_follow_up() {
        let fx = Fixture::new();
        let shipment = fx.create(tracked_shipment("T", Some(ShipmentStatus::Processing)));

        let result = fx.service.run_step(shipment.id).await;

        let job_id = match result {
            StepResult::Updated {
                old_status,
                new_status,
                follow_up: FollowUp::Scheduled { job_id },
                ..
            } => {
                assert_eq!(old_status, Some(ShipmentStatus::Processing));
                assert_eq!(new_status, ShipmentStatus::Shipped);
                job_id
            }
            other => panic!("unexpected result: {:?}", other),
        };

        let stored = fx.store.get(shipment.id).unwrap().unwrap();
        assert_eq!(stored.status, Some(ShipmentStatus::Shipped));
        assert!(stored.updated_at.is_some());

        let calls = fx.scheduler.recorded_enqueues().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].job_id, Some(job_id));
        assert_eq!(calls[0].request.kind, JobKind::RunTrackingStep);
        assert_eq!(calls[0].request.shipment_id, shipment.id);
        assert_eq!(calls[0].request.delay, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_step_reaching_delivered_schedules_nothing() {
        let fx = Fixture::new();
        let shipment = fx.create(tracked_shipment("T", Some(ShipmentStatus::InTransit)));

        let result = fx.service.run_step(shipment.id).await;

        assert_eq!(
            result,
            StepResult::Updated {
                shipment_id: shipment.id,
                old_status: Some(ShipmentStatus::InTransit),
                new_status: ShipmentStatus::Delivered,
                follow_up: FollowUp::NotNeeded,
            }
        );
        assert_eq!(fx.status_of(shipment.id), Some(ShipmentStatus::Delivered));
        assert_eq!(fx.scheduler.enqueue_count().await, 0);
    }

    #[tokio::test]
    async fn test_step_with_null_status_writes_pending() {
        let fx = Fixture::new();
        let shipment = fx.create(tracked_shipment("T", None));

        let result = fx.service.run_step(shipment.id).await;

        match result {
            StepResult::Updated {
                old_status: None,
                new_status: ShipmentStatus::Pending,
                follow_up: FollowUp::Scheduled { .. },
                ..
            } => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(fx.status_of(shipment.id), Some(ShipmentStatus::Pending));
    }

    #[tokio::test]
    async fn test_write_failure_returns_retryable_error_without_enqueue() {
        let fx = Fixture::new();
        let shipment = fx.create(tracked_shipment("T", Some(ShipmentStatus::Shipped)));
        fx.store
            .fail_writes(Some(StoreFailure::Database("database is locked".to_string())));

        let result = fx.service.run_step(shipment.id).await;

        match &result {
            StepResult::Error {
                error, retryable, ..
            } => {
                assert!(!error.is_empty());
                assert!(*retryable);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(fx.status_of(shipment.id), Some(ShipmentStatus::Shipped));
        assert_eq!(fx.scheduler.enqueue_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_data_is_permanent_error() {
        let fx = Fixture::new();
        let shipment = fx.create(tracked_shipment("T", Some(ShipmentStatus::Shipped)));
        fx.store
            .fail_reads(Some(StoreFailure::InvalidData("unknown status 'lost'".to_string())));

        let result = fx.service.run_step(shipment.id).await;

        assert!(matches!(result, StepResult::Error { retryable: false, .. }));
        assert!(!result.is_retryable());
        assert_eq!(fx.store.transition_calls(), 0);
        assert_eq!(fx.scheduler.enqueue_count().await, 0);
    }

    #[tokio::test]
    async fn test_enqueue_failure_keeps_written_status() {
        let fx = Fixture::new();
        let shipment = fx.create(tracked_shipment("T", Some(ShipmentStatus::Pending)));
        fx.scheduler
            .set_next_error(SchedulerError::Database("queue full".to_string()))
            .await;

        let result = fx.service.run_step(shipment.id).await;

        match result {
            StepResult::Updated {
                new_status: ShipmentStatus::Processing,
                follow_up: FollowUp::EnqueueFailed { error },
                ..
            } => assert!(error.contains("queue full")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(fx.status_of(shipment.id), Some(ShipmentStatus::Processing));
        assert_eq!(fx.scheduler.enqueue_count().await, 0);
    }

    /// Store whose `get` lets a concurrent writer sneak in before returning.
    struct RacingStore {
        inner: SqliteShipmentStore,
        racing_status: ShipmentStatus,
    }

    impl ShipmentStore for RacingStore {
        fn create(&self, request: CreateShipmentRequest) -> Result<Shipment, ShipmentError> {
            self.inner.create(request)
        }

        fn get(&self, id: i64) -> Result<Option<Shipment>, ShipmentError> {
            let snapshot = self.inner.get(id)?;
            self.inner.update(
                id,
                ShipmentPatch {
                    status: Some(self.racing_status),
                    ..Default::default()
                },
            )?;
            Ok(snapshot)
        }

        fn list(&self, filter: &ShipmentFilter) -> Result<Vec<Shipment>, ShipmentError> {
            self.inner.list(filter)
        }

        fn count(&self, filter: &ShipmentFilter) -> Result<i64, ShipmentError> {
            self.inner.count(filter)
        }

        fn update(&self, id: i64, patch: ShipmentPatch) -> Result<Shipment, ShipmentError> {
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

    #[tokio::test]
    async fn test_concurrent_change_yields_conflict() {
        let store = Arc::new(RacingStore {
            inner: SqliteShipmentStore::in_memory().unwrap(),
            racing_status: ShipmentStatus::Cancelled,
        });
        let scheduler = Arc::new(MockJobScheduler::new());
        let service = TrackingService::new(
            store.clone(),
            scheduler.clone(),
            TrackingConfig::default(),
        );
        let shipment = store
            .inner
            .create(tracked_shipment("T", Some(ShipmentStatus::Processing)))
            .unwrap();

        let result = service.run_step(shipment.id).await;

        assert_eq!(
            result,
            StepResult::Conflict {
                shipment_id: shipment.id,
                expected: Some(ShipmentStatus::Processing),
                found: Some(ShipmentStatus::Cancelled),
            }
        );
        let stored = store.inner.get(shipment.id).unwrap().unwrap();
        assert_eq!(stored.status, Some(ShipmentStatus::Cancelled));
        assert_eq!(scheduler.enqueue_count().await, 0);
    }

    #[tokio::test]
    async fn test_trigger_now_enqueues_immediate_step() {
        let fx = Fixture::new();
        let shipment = fx.create(tracked_shipment("T", Some(ShipmentStatus::Pending)));

        let job_id = fx.service.trigger_now(shipment.id).await.unwrap();

        let requests = fx.scheduler.accepted_requests().await;
        assert_eq!(requests, vec![JobRequest::tracking_step(shipment.id, Duration::ZERO)]);
        assert_eq!(fx.scheduler.recorded_enqueues().await[0].job_id, Some(job_id));
    }

    #[tokio::test]
    async fn test_trigger_not_found() {
        let fx = Fixture::new();

        let err = fx.service.trigger_now(77).await.unwrap_err();

        assert!(matches!(err, TrackingError::NotFound(77)));
        assert_eq!(fx.scheduler.recorded_enqueues().await.len(), 0);
    }

    #[tokio::test]
    async fn test_trigger_without_tracking_number_is_bad_request() {
        let fx = Fixture::new();
        let shipment = fx.create(untracked_shipment(None));

        let err = fx.service.trigger_now(shipment.id).await.unwrap_err();

        assert!(matches!(err, TrackingError::NoTrackingNumber(id) if id == shipment.id));
        assert_eq!(fx.scheduler.recorded_enqueues().await.len(), 0);
    }

    #[tokio::test]
    async fn test_trigger_with_scheduler_unavailable() {
        let fx = Fixture::new();
        let shipment = fx.create(tracked_shipment("T", None));
        fx.scheduler.set_unavailable(true).await;

        let err = fx.service.trigger_now(shipment.id).await.unwrap_err();

        assert!(matches!(err, TrackingError::ServiceUnavailable(_)));
        assert_eq!(fx.scheduler.enqueue_count().await, 0);
    }

    #[tokio::test]
    async fn test_trigger_store_failure() {
        let fx = Fixture::new();
        fx.store
            .fail_reads(Some(StoreFailure::Database("disk I/O error".to_string())));

        let err = fx.service.trigger_now(1).await.unwrap_err();

        assert!(matches!(err, TrackingError::Store(_)));
    }

    #[tokio::test]
    async fn test_kickoff_after_change_uses_configured_delay() {
        let fx = Fixture::new();
        let tracked = fx.create(tracked_shipment("T", None));
        let untracked = fx.create(untracked_shipment(None));

        assert!(fx.service.kickoff_after_change(tracked.id).await.is_some());
        assert!(fx.service.kickoff_after_change(untracked.id).await.is_none());

        let requests = fx.scheduler.accepted_requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].shipment_id, tracked.id);
        assert_eq!(requests[0].delay, Duration::from_secs(60));
    }
}
