//! Shared helpers for pipeline integration tests
//!
//! [`TestPipeline`] wires a full in-process pipeline (store, workers,
//! notifier, bus) onto the per-test database pool that `#[sqlx::test]`
//! provides, with timings tightened so tests finish quickly.

use roster_jobs::notifier::Notifier;
use roster_jobs::notify::{Notification, NotificationBus, NotificationKind, Subscription};
use roster_jobs::queue::{JobStore, QueueEvents};
use roster_jobs::workers::{JobHandler, WorkerConfig, WorkerRunner};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Worker timings tight enough for tests
pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(20),
        heartbeat_interval: Duration::from_millis(50),
        lease_timeout: Duration::from_secs(5),
        reclaim_interval: Duration::from_millis(100),
    }
}

/// A running pipeline bound to one test database
#[allow(dead_code)]
pub struct TestPipeline {
    pub store: JobStore,
    pub events: QueueEvents,
    pub bus: NotificationBus,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl TestPipeline {
    /// Spawn the notifier plus one worker runner per handler
    pub fn start(pool: SqlitePool, handlers: Vec<Arc<dyn JobHandler>>) -> Self {
        let events = QueueEvents::new(64);
        let store = JobStore::new(pool, events.clone());
        let bus = NotificationBus::new(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut handles = vec![Notifier::new(bus.clone()).spawn(&events, shutdown_rx.clone())];
        let config = fast_worker_config();
        for handler in handlers {
            handles.push(
                WorkerRunner::new(store.clone(), handler, config.clone(), shutdown_rx.clone())
                    .spawn(),
            );
        }

        Self {
            store,
            events,
            bus,
            shutdown: shutdown_tx,
            handles,
        }
    }

    /// Stop every spawned task and wait for it
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Write a CSV file under `dir` and return its path
#[allow(dead_code)]
pub fn write_csv(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("write csv fixture");
    path
}

/// Wait for the next notification of `kind`, discarding others on the way.
/// Panics after five seconds.
#[allow(dead_code)]
pub async fn await_kind(sub: &mut Subscription, kind: NotificationKind) -> Notification {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let notification = sub.recv().await.expect("notification bus closed");
            if notification.kind == kind {
                return notification;
            }
        }
    })
    .await
    .expect("timed out waiting for notification")
}
