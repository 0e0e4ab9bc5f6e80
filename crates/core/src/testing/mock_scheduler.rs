//! Mock job scheduler for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::jobs::{JobId, JobRequest, JobScheduler, SchedulerError};

/// A recorded enqueue call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedEnqueue {
    /// The request that was submitted.
    pub request: JobRequest,
    /// The id handed back, if the enqueue succeeded.
    pub job_id: Option<JobId>,
}

/// Mock implementation of the JobScheduler trait.
///
/// Records every enqueue call and can simulate an unavailable queue or a
/// single failing enqueue.
///
/// # Example
///
/// ```rust,ignore
/// use waybill_core::testing::MockJobScheduler;
///
/// let scheduler = MockJobScheduler::new();
/// service.trigger_now(shipment.id).await?;
///
/// let calls = scheduler.recorded_enqueues().await;
/// assert_eq!(calls.len(), 1);
/// assert_eq!(calls[0].request.delay, Duration::ZERO);
/// ```
#[derive(Debug)]
pub struct MockJobScheduler {
    enqueues: Arc<RwLock<Vec<RecordedEnqueue>>>,
    /// If set, the next enqueue will fail with this error.
    next_error: Arc<RwLock<Option<SchedulerError>>>,
    /// While true, every enqueue fails with `Unavailable`.
    unavailable: Arc<RwLock<bool>>,
    next_id: Arc<RwLock<i64>>,
}

impl Default for MockJobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockJobScheduler {
    /// Create a new mock scheduler.
    pub fn new() -> Self {
        Self {
            enqueues: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            unavailable: Arc::new(RwLock::new(false)),
            next_id: Arc::new(RwLock::new(1)),
        }
    }

    /// Get all recorded enqueue calls, including failed ones.
    pub async fn recorded_enqueues(&self) -> Vec<RecordedEnqueue> {
        self.enqueues.read().await.clone()
    }

    /// Requests that were accepted.
    pub async fn accepted_requests(&self) -> Vec<JobRequest> {
        self.enqueues
            .read()
            .await
            .iter()
            .filter(|e| e.job_id.is_some())
            .map(|e| e.request.clone())
            .collect()
    }

    /// Get the number of accepted enqueues.
    pub async fn enqueue_count(&self) -> usize {
        self.accepted_requests().await.len()
    }

    /// Clear recorded calls.
    pub async fn clear(&self) {
        self.enqueues.write().await.clear();
    }

    /// Configure the next enqueue to fail with the given error.
    pub async fn set_next_error(&self, error: SchedulerError) {
        *self.next_error.write().await = Some(error);
    }

    /// Simulate the queue going away (or coming back).
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    async fn take_error(&self) -> Option<SchedulerError> {
        if *self.unavailable.read().await {
            return Some(SchedulerError::Unavailable("mock scheduler offline".to_string()));
        }
        self.next_error.write().await.take()
    }
}

#[async_trait]
impl JobScheduler for MockJobScheduler {
    async fn enqueue(&self, request: JobRequest) -> Result<JobId, SchedulerError> {
        if let Some(err) = self.take_error().await {
            self.enqueues.write().await.push(RecordedEnqueue {
                request,
                job_id: None,
            });
            return Err(err);
        }

        let job_id = {
            let mut next_id = self.next_id.write().await;
            let id = JobId(*next_id);
            *next_id += 1;
            id
        };

        self.enqueues.write().await.push(RecordedEnqueue {
            request,
            job_id: Some(job_id),
        });

        Ok(job_id)
    }
}
