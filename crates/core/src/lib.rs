pub mod config;
pub mod jobs;
pub mod metrics;
pub mod shipment;
pub mod testing;
pub mod tracking;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    ServerConfig,
};
pub use jobs::{
    Job, JobId, JobKind, JobRequest, JobScheduler, JobState, QueueStats, SchedulerError,
    SqliteJobQueue,
};
pub use shipment::{
    CreateShipmentRequest, Shipment, ShipmentError, ShipmentFilter, ShipmentPatch, ShipmentStatus,
    ShipmentStore, SqliteShipmentStore, StatusTransition,
};
pub use tracking::{
    next_status, FollowUp, StepResult, TrackingConfig, TrackingError, TrackingService,
    TrackingWorker, WorkerError, WorkerStatus,
};
