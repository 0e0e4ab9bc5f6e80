//! Scheduling seam used by the tracking service.

use async_trait::async_trait;

use super::{JobId, JobRequest, SchedulerError};

/// Something that can run a job later.
///
/// The tracking service only ever talks to this trait, so the SQLite queue can
/// be swapped for a mock, a timer wheel or an external broker.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Enqueue a job to run after `request.delay`.
    ///
    /// Delivery is at-least-once. While a job of the same kind is still queued
    /// for the shipment, a durable scheduler returns that job instead of adding
    /// a second one, moving it earlier when `request.delay` is shorter.
    async fn enqueue(&self, request: JobRequest) -> Result<JobId, SchedulerError>;
}
