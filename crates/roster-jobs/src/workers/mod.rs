//! Worker runtime
//!
//! Polling consumers that lease jobs off the store, run a handler, and
//! report the outcome back. Each runner keeps the lease alive with a
//! heartbeat task while a job is in flight and runs a sweeper that returns
//! jobs from crashed workers to the queue.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::queue::{JobStore, LeasedJob};

pub mod create;
pub mod import;

pub use create::{CreateWorker, DEFAULT_CREATE_DELAY};
pub use import::{ImportHooks, ImportWorker, DEFAULT_BATCH_SIZE, DEFAULT_TOTAL_ROWS_ESTIMATE};

/// Timing knobs for the polling consumers
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between lease attempts when the queue is empty
    pub poll_interval: Duration,
    /// How often an in-flight job refreshes its lease
    pub heartbeat_interval: Duration,
    /// Heartbeat age beyond which a lease counts as abandoned.
    /// Must comfortably exceed the heartbeat interval.
    pub lease_timeout: Duration,
    /// How often the sweeper looks for abandoned leases
    pub reclaim_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(15),
            lease_timeout: Duration::from_secs(120),
            reclaim_interval: Duration::from_secs(30),
        }
    }
}

/// Everything a handler may touch during one job execution
pub struct JobContext {
    job: LeasedJob,
    store: JobStore,
}

impl JobContext {
    pub fn job(&self) -> &LeasedJob {
        &self.job
    }

    /// Decode the job payload into a typed value
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        self.job.payload_as()
    }

    /// Report a new progress value
    pub async fn update_progress<P: Serialize>(&self, progress: &P) -> Result<()> {
        self.store.update_progress(&self.job, progress).await
    }

    /// Merge a durable checkpoint into the job payload
    pub async fn checkpoint<P: Serialize>(&self, patch: &P) -> Result<()> {
        self.store.update_data(&self.job, patch).await
    }
}

/// A queue consumer. One handler instance serves every job on its queue.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Queue this handler consumes
    fn queue_name(&self) -> &'static str;

    /// Execute one job to completion.
    ///
    /// The returned value becomes the job's return value, carried on the
    /// Completed lifecycle event. An error counts as a failed attempt and
    /// goes through the retry policy.
    async fn handle(&self, ctx: &JobContext) -> Result<Value>;
}

/// Polling loop around one handler
pub struct WorkerRunner {
    worker_id: Uuid,
    store: JobStore,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
}

impl WorkerRunner {
    pub fn new(
        store: JobStore,
        handler: Arc<dyn JobHandler>,
        config: WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            store,
            handler,
            config,
            shutdown,
        }
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// Spawn the poll loop together with the reclaim sweeper for its queue
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(mut self) {
        let queue = self.handler.queue_name();
        info!(worker_id = %self.worker_id, queue, "Worker started");

        let reclaimer = spawn_reclaimer(
            self.store.clone(),
            queue,
            self.config.clone(),
            self.shutdown.clone(),
        );

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match self.store.lease(queue, self.worker_id).await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = self.shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    error!(queue, error = %e, "Lease poll failed");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        reclaimer.abort();
        info!(worker_id = %self.worker_id, queue, "Worker stopped");
    }

    /// Run one leased job through its handler and record the outcome.
    /// In-flight work is never cancelled by shutdown; the loop simply stops
    /// leasing new jobs.
    async fn process(&self, job: LeasedJob) {
        let heartbeat = self.start_heartbeat_task(&job);
        let ctx = JobContext {
            job: job.clone(),
            store: self.store.clone(),
        };

        let result = self.handler.handle(&ctx).await;
        heartbeat.abort();

        match result {
            Ok(return_value) => {
                if let Err(e) = self.store.ack(&job, return_value).await {
                    warn!(job_id = %job.job.id, error = %e, "Could not ack completed job");
                }
            }
            Err(e) => {
                if let Err(fail_err) = self.store.fail(&job, &e.to_string()).await {
                    warn!(job_id = %job.job.id, error = %fail_err, "Could not record job failure");
                }
            }
        }
    }

    fn start_heartbeat_task(&self, job: &LeasedJob) -> JoinHandle<()> {
        let store = self.store.clone();
        let job = job.clone();
        let period = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            // First tick fires immediately; the lease itself already stamped
            // the heartbeat, so swallow it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = store.heartbeat(&job).await {
                    debug!(job_id = %job.job.id, error = %e, "Heartbeat stopped");
                    break;
                }
            }
        })
    }
}

/// Periodically return heartbeat-dead Active jobs to Waiting
fn spawn_reclaimer(
    store: JobStore,
    queue: &'static str,
    config: WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(config.reclaim_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = store.reclaim_stale(queue, config.lease_timeout).await {
                        warn!(queue, error = %e, "Stale lease reclaim failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
