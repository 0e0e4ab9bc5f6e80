use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use waybill_core::{
    Config, ShipmentStore, SqliteJobQueue, TrackingService, TrackingWorker, WorkerStatus,
};

/// Shared application state
pub struct AppState {
    config: Config,
    shipment_store: Arc<dyn ShipmentStore>,
    job_queue: Arc<SqliteJobQueue>,
    tracking: Arc<TrackingService>,
    /// None when the worker is disabled in config
    worker: Option<Arc<TrackingWorker>>,
}

impl AppState {
    pub fn new(
        config: Config,
        shipment_store: Arc<dyn ShipmentStore>,
        job_queue: Arc<SqliteJobQueue>,
        tracking: Arc<TrackingService>,
        worker: Option<Arc<TrackingWorker>>,
    ) -> Self {
        Self {
            config,
            shipment_store,
            job_queue,
            tracking,
            worker,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn shipment_store(&self) -> &dyn ShipmentStore {
        self.shipment_store.as_ref()
    }

    pub fn job_queue(&self) -> &SqliteJobQueue {
        &self.job_queue
    }

    pub fn tracking(&self) -> &TrackingService {
        &self.tracking
    }

    pub fn worker(&self) -> Option<&Arc<TrackingWorker>> {
        self.worker.as_ref()
    }

    /// Worker status, or queue stats alone when no worker runs in this process.
    pub fn tracking_status(&self) -> WorkerStatus {
        match &self.worker {
            Some(worker) => worker.status(),
            None => WorkerStatus {
                running: false,
                active_steps: 0,
                concurrency: self.config.tracking.concurrency,
                queue: self.job_queue.stats(Utc::now()).unwrap_or_else(|e| {
                    warn!("Failed to read job queue stats: {}", e);
                    Default::default()
                }),
            },
        }
    }
}
