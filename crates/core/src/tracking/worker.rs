//! Background worker that executes queued tracking steps.
//!
//! - Poll loop: claims due jobs and runs each step on its own task, bounded
//!   by a semaphore sized to `concurrency`.
//! - Reconcile loop: restarts chains that stalled without a pending job and
//!   purges old finished jobs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::jobs::{Job, JobKind, JobRequest, JobScheduler, SqliteJobQueue};
use crate::metrics;

use super::config::TrackingConfig;
use super::service::TrackingService;
use super::types::{StepResult, WorkerError, WorkerStatus};

/// Shipments examined per reconciliation pass.
const RECONCILE_BATCH: i64 = 500;

/// The tracking worker.
pub struct TrackingWorker {
    config: TrackingConfig,
    service: Arc<TrackingService>,
    queue: Arc<SqliteJobQueue>,

    // Runtime state
    running: Arc<AtomicBool>,
    permits: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TrackingWorker {
    /// Create a new worker.
    pub fn new(
        config: TrackingConfig,
        service: Arc<TrackingService>,
        queue: Arc<SqliteJobQueue>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));

        Self {
            config,
            service,
            queue,
            running: Arc::new(AtomicBool::new(false)),
            permits,
            shutdown_tx,
        }
    }

    /// Start the worker (spawns background tasks).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Tracking worker already running");
            return;
        }

        info!("Starting tracking worker");

        // Jobs left running by a previous process never finished
        match self.queue.recover_running() {
            Ok(0) => {}
            Ok(n) => info!("Requeued {} job(s) interrupted by the last shutdown", n),
            Err(e) => error!("Failed to recover interrupted jobs: {}", e),
        }

        self.spawn_poll_loop();

        if self.config.reconcile_interval_secs > 0 {
            self.spawn_reconcile_loop();
        }

        info!(
            "Tracking worker started (concurrency {}, poll every {}ms)",
            self.config.concurrency, self.config.poll_interval_ms
        );
    }

    /// Stop the worker gracefully.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Tracking worker not running");
            return;
        }

        info!("Stopping tracking worker");

        let _ = self.shutdown_tx.send(());

        // Wait for in-flight steps
        let total = self.config.concurrency.max(1) as u32;
        match tokio::time::timeout(Duration::from_secs(5), self.permits.acquire_many(total)).await {
            Ok(Ok(permits)) => drop(permits),
            Ok(Err(_)) => {}
            Err(_) => warn!("Timed out waiting for in-flight tracking steps"),
        }

        info!("Tracking worker stopped");
    }

    /// Get current worker status.
    pub fn status(&self) -> WorkerStatus {
        let concurrency = self.config.concurrency.max(1);
        let queue = self.queue.stats(Utc::now()).unwrap_or_else(|e| {
            warn!("Failed to read job queue stats: {}", e);
            Default::default()
        });

        WorkerStatus {
            running: self.running.load(Ordering::Relaxed),
            active_steps: concurrency.saturating_sub(self.permits.available_permits()),
            concurrency,
            queue,
        }
    }

    /// Claim whatever is due right now and wait for those steps to finish.
    ///
    /// Runs independently of the background loops.
    pub async fn run_due_jobs(&self) -> Result<Vec<StepResult>, WorkerError> {
        let handles =
            Self::dispatch_due(&self.queue, &self.service, &self.config, &self.permits).await?;

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => error!("Tracking step task panicked: {}", e),
            }
        }
        Ok(results)
    }

    /// Run one reconciliation pass. Returns the number of chains restarted.
    pub async fn reconcile(&self) -> Result<usize, WorkerError> {
        Self::reconcile_stale(&self.queue, &self.service, &self.config).await
    }

    fn spawn_poll_loop(&self) {
        let running = Arc::clone(&self.running);
        let queue = Arc::clone(&self.queue);
        let service = Arc::clone(&self.service);
        let permits = Arc::clone(&self.permits);
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Tracking poll loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Tracking poll loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        // Steps keep running on their own tasks
                        if let Err(e) = Self::dispatch_due(&queue, &service, &config, &permits).await {
                            warn!("Failed to dispatch tracking jobs: {}", e);
                        }
                    }
                }
            }
            info!("Tracking poll loop stopped");
        });
    }

    fn spawn_reconcile_loop(&self) {
        let running = Arc::clone(&self.running);
        let queue = Arc::clone(&self.queue);
        let service = Arc::clone(&self.service);
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Tracking reconcile loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Tracking reconcile loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(config.reconcile_interval_secs)) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = Self::reconcile_stale(&queue, &service, &config).await {
                            warn!("Reconciliation failed: {}", e);
                        }
                    }
                }
            }
            info!("Tracking reconcile loop stopped");
        });
    }

    /// Claim up to the number of free permits and spawn one task per job.
    async fn dispatch_due(
        queue: &Arc<SqliteJobQueue>,
        service: &Arc<TrackingService>,
        config: &TrackingConfig,
        permits: &Arc<Semaphore>,
    ) -> Result<Vec<JoinHandle<StepResult>>, WorkerError> {
        let available = permits.available_permits();
        if available == 0 {
            return Ok(Vec::new());
        }

        let jobs = queue.claim_due(Utc::now(), available)?;
        let mut handles = Vec::with_capacity(jobs.len());

        for job in jobs {
            let permit = match Arc::clone(permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    queue.retry_later(job.id, Duration::ZERO, "worker stopping")?;
                    continue;
                }
            };

            let queue = Arc::clone(queue);
            let service = Arc::clone(service);
            let config = config.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(&queue, &service, &config, job).await
            }));
        }

        Ok(handles)
    }

    async fn execute_job(
        queue: &SqliteJobQueue,
        service: &TrackingService,
        config: &TrackingConfig,
        job: Job,
    ) -> StepResult {
        debug!(
            "Running job {} ({}) for shipment {}, attempt {}/{}",
            job.id, job.kind, job.shipment_id, job.attempts, job.max_attempts
        );

        let result = match job.kind {
            JobKind::RunTrackingStep => service.run_step(job.shipment_id).await,
        };

        if let Err(e) = Self::settle(queue, config, &job, &result) {
            error!("Failed to record outcome of job {}: {}", job.id, e);
        }

        result
    }

    /// Record a step outcome on its job: done, retry later, or failed.
    fn settle(
        queue: &SqliteJobQueue,
        config: &TrackingConfig,
        job: &Job,
        result: &StepResult,
    ) -> Result<(), WorkerError> {
        let StepResult::Error {
            error, retryable, ..
        } = result
        else {
            queue.complete(job.id)?;
            return Ok(());
        };

        if *retryable && job.can_retry() {
            let delay = config.retry_delay(job.attempts);
            warn!(
                "Tracking step for shipment {} failed (attempt {}/{}), retrying in {:?}: {}",
                job.shipment_id, job.attempts, job.max_attempts, delay, error
            );
            queue.retry_later(job.id, delay, error)?;
            metrics::JOB_RETRIES.inc();
            return Ok(());
        }

        let reason = if *retryable { "exhausted" } else { "permanent" };
        error!(
            "Tracking step for shipment {} failed ({}), giving up on job {}: {}",
            job.shipment_id, reason, job.id, error
        );
        queue.fail(job.id, error)?;
        metrics::JOBS_FAILED.with_label_values(&[reason]).inc();
        Ok(())
    }

    async fn reconcile_stale(
        queue: &SqliteJobQueue,
        service: &TrackingService,
        config: &TrackingConfig,
    ) -> Result<usize, WorkerError> {
        let before = seconds_ago(config.stale_after_secs);
        let stale = service.store().list_stale_tracked(before, RECONCILE_BATCH)?;

        let mut restarted = 0;
        for shipment in stale {
            if queue.has_pending(shipment.id)? {
                continue;
            }

            let job_id = queue
                .enqueue(JobRequest::tracking_step(shipment.id, Duration::ZERO))
                .await?;
            restarted += 1;
            metrics::CHAINS_RECONCILED.inc();
            info!(
                "Restarted stalled tracking for shipment {} (status {:?}) as job {}",
                shipment.id, shipment.status, job_id
            );
        }

        if config.job_retention_secs > 0 {
            let purged = queue.purge_finished(seconds_ago(config.job_retention_secs))?;
            if purged > 0 {
                debug!("Purged {} finished job(s)", purged);
            }
        }

        Ok(restarted)
    }
}

fn seconds_ago(secs: u64) -> DateTime<Utc> {
    chrono::Duration::from_std(Duration::from_secs(secs))
        .ok()
        .and_then(|d| Utc::now().checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
