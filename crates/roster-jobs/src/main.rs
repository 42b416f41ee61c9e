//! Roster jobs runner - main entry point

use anyhow::Result;
use roster_common::logging::{init_logging, LogConfig};
use roster_jobs::config::Config;
use roster_jobs::notifier::Notifier;
use roster_jobs::notify::NotificationBus;
use roster_jobs::queue::{JobStore, QueueEvents};
use roster_jobs::records::MemoryRecordStore;
use roster_jobs::workers::{CreateWorker, ImportWorker, WorkerRunner};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging first so everything below is visible
    let log_config = LogConfig::builder()
        .log_file_prefix("roster-jobs".to_string())
        .filter_directives("roster_jobs=debug,sqlx=warn".to_string())
        .build();
    let log_config = LogConfig::from_env().unwrap_or(log_config);
    init_logging(&log_config)?;

    info!("Starting roster jobs runner");

    let config = Config::load()?;
    info!(database = %config.database.url, "Configuration loaded");

    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    info!("Database connection pool established");

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations completed");

    let events = QueueEvents::default();
    let store = JobStore::new(pool, events.clone());
    let bus = NotificationBus::new(config.notifications.bus_capacity);
    let records = Arc::new(MemoryRecordStore::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let notifier_handle = Notifier::new(bus.clone()).spawn(&events, shutdown_rx.clone());
    let delivery_handle = spawn_notification_log(bus, shutdown_rx.clone());

    let worker_config = config.worker_config();
    let import_worker = ImportWorker::new(records.clone()).with_batch_size(config.import.batch_size);
    let create_worker = CreateWorker::new(records)
        .with_delay(Duration::from_millis(config.workers.create_delay_ms));

    let import_handle = WorkerRunner::new(
        store.clone(),
        Arc::new(import_worker),
        worker_config.clone(),
        shutdown_rx.clone(),
    )
    .spawn();
    let create_handle =
        WorkerRunner::new(store, Arc::new(create_worker), worker_config, shutdown_rx).spawn();
    info!("Workers started");

    signal::ctrl_c().await?;
    info!("Shutdown signal received, finishing in-flight work");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(
        import_handle,
        create_handle,
        notifier_handle,
        delivery_handle
    );
    info!("Roster jobs runner shut down");

    Ok(())
}

/// Log every notification the pipeline produces.
///
/// Stands in for the delivery layer (socket server, SSE endpoint) that would
/// normally subscribe here; without it the runner's outcomes would be
/// invisible.
fn spawn_notification_log(
    bus: NotificationBus,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let mut subscription = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                notification = subscription.recv() => match notification {
                    Some(notification) => {
                        info!(kind = ?notification.kind, message = %notification.message, "Notification");
                    }
                    None => break,
                }
            }
        }
    })
}
