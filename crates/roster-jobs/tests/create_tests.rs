//! End-to-end single creation tests
//!
//! Runs the employee creation worker through the real runtime and asserts
//! that outcomes reach exactly the account that asked for them.

mod common;

use async_trait::async_trait;
use common::{await_kind, TestPipeline};
use roster_jobs::notify::NotificationKind;
use roster_jobs::queue::{CreateJobPayload, EnqueueOptions, JobState, CREATE_JOB_TYPE, EMPLOYEE_QUEUE};
use roster_jobs::records::{Employee, MemoryRecordStore, NewEmployee, RecordStore};
use roster_jobs::workers::CreateWorker;
use roster_jobs::{JobError, Result};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn ada(owner: &str) -> CreateJobPayload {
    CreateJobPayload {
        owner_id: owner.to_string(),
        name: "Ada".to_string(),
        age: 36,
        position: "Analyst".to_string(),
        salary: 90_000.0,
    }
}

fn fast_create_worker(records: Arc<dyn RecordStore>) -> CreateWorker {
    CreateWorker::new(records).with_delay(Duration::from_millis(10))
}

#[sqlx::test]
async fn test_creation_notifies_only_the_owner(pool: SqlitePool) {
    let records = Arc::new(MemoryRecordStore::new());
    let pipeline = TestPipeline::start(pool, vec![Arc::new(fast_create_worker(records.clone()))]);
    let mut owner = pipeline.bus.subscribe_owner("user-1");
    let mut bystander = pipeline.bus.subscribe_owner("user-2");

    pipeline
        .store
        .enqueue(
            EMPLOYEE_QUEUE,
            CREATE_JOB_TYPE,
            &ada("user-1"),
            EnqueueOptions::default(),
        )
        .await
        .expect("enqueue");

    let created = await_kind(&mut owner, NotificationKind::Created).await;
    assert_eq!(created.message, "Employee Ada has been successfully added.");

    // The payload carries the stored record, id included.
    let data = created.data.expect("employee data");
    assert_eq!(data["name"], "Ada");
    Uuid::parse_str(data["id"].as_str().expect("id string")).expect("valid uuid");

    assert_eq!(records.count(), 1);
    assert!(bystander.try_recv().is_none());

    pipeline.shutdown().await;
}

#[sqlx::test]
async fn test_creation_failure_notifies_owner_once(pool: SqlitePool) {
    let records = Arc::new(MemoryRecordStore::new());
    records.set_fail_creates(true);
    let pipeline = TestPipeline::start(pool, vec![Arc::new(fast_create_worker(records.clone()))]);
    let mut owner = pipeline.bus.subscribe_owner("user-1");

    let id = pipeline
        .store
        .enqueue(
            EMPLOYEE_QUEUE,
            CREATE_JOB_TYPE,
            &ada("user-1"),
            EnqueueOptions {
                max_attempts: 2,
                backoff_base_secs: 0,
                remove_on_complete: false,
                remove_on_fail: false,
            },
        )
        .await
        .expect("enqueue");

    let failed = await_kind(&mut owner, NotificationKind::CreationFailed).await;
    assert!(failed.message.starts_with("Failed to create employee Ada:"));

    // Both executions failed but only the terminal one notified.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(owner.try_recv().is_none());

    let job = pipeline.store.get(id).await.expect("get").expect("dead letter kept");
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts_made, 2);
    assert_eq!(records.count(), 0);

    pipeline.shutdown().await;
}

/// Record store whose first insert fails, after which it recovers
struct FailsOnce {
    inner: Arc<MemoryRecordStore>,
    tripped: AtomicBool,
}

#[async_trait]
impl RecordStore for FailsOnce {
    async fn create(&self, record: NewEmployee) -> Result<Employee> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(JobError::RecordStore("connection reset".to_string()));
        }
        self.inner.create(record).await
    }

    async fn create_many(&self, records: &[NewEmployee]) -> Result<u64> {
        self.inner.create_many(records).await
    }

    async fn find(&self, id: Uuid) -> Result<Option<Employee>> {
        self.inner.find(id).await
    }

    async fn update(&self, id: Uuid, record: NewEmployee) -> Result<Option<Employee>> {
        self.inner.update(id, record).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        self.inner.delete(id).await
    }
}

#[sqlx::test]
async fn test_transient_failure_retries_to_success(pool: SqlitePool) {
    let records = Arc::new(MemoryRecordStore::new());
    let store = FailsOnce {
        inner: records.clone(),
        tripped: AtomicBool::new(false),
    };
    let pipeline = TestPipeline::start(pool, vec![Arc::new(fast_create_worker(Arc::new(store)))]);
    let mut owner = pipeline.bus.subscribe_owner("user-1");

    let id = pipeline
        .store
        .enqueue(
            EMPLOYEE_QUEUE,
            CREATE_JOB_TYPE,
            &ada("user-1"),
            EnqueueOptions {
                max_attempts: 3,
                backoff_base_secs: 0,
                remove_on_complete: false,
                remove_on_fail: false,
            },
        )
        .await
        .expect("enqueue");

    // At-least-once: the first execution fails, the retry lands.
    let created = await_kind(&mut owner, NotificationKind::Created).await;
    assert_eq!(created.message, "Employee Ada has been successfully added.");
    assert_eq!(records.count(), 1);

    let job = pipeline.store.get(id).await.expect("get").expect("row kept");
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts_made, 1);

    pipeline.shutdown().await;
}
