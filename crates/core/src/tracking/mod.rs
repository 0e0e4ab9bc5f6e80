//! Shipment tracking workflow.
//!
//! A tracking step advances one shipment along the status progression and,
//! while the new status is not terminal, queues the next step. The worker
//! executes queued steps and keeps stalled chains alive.

mod config;
mod service;
mod state_machine;
mod types;
mod worker;

pub use config::TrackingConfig;
pub use service::TrackingService;
pub use state_machine::next_status;
pub use types::{FollowUp, StepResult, TrackingError, WorkerError, WorkerStatus};
pub use worker::TrackingWorker;
