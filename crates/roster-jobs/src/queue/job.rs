//! Job model and queue data types

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{JobError, Result};

// ============================================================================
// Queue and Job Type Names
// ============================================================================

/// Queue carrying bulk CSV import jobs
pub const IMPORT_QUEUE: &str = "import-queue";

/// Queue carrying single employee creation jobs
pub const EMPLOYEE_QUEUE: &str = "employee-queue";

/// Job type processed by the import worker
pub const IMPORT_JOB_TYPE: &str = "import-employees";

/// Job type processed by the creation worker
pub const CREATE_JOB_TYPE: &str = "create-employee";

// ============================================================================
// Default Retry Policy
// ============================================================================

/// Default number of execution attempts before a job dead-letters
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Default base delay for exponential backoff, in seconds
pub const DEFAULT_BACKOFF_BASE_SECS: i64 = 5;

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Enqueued and eligible for leasing
    Waiting,
    /// Leased by a worker, execution in flight
    Active,
    /// Finished successfully
    Completed,
    /// Retry budget exhausted, terminally failed
    Failed,
    /// Failed execution waiting out its backoff delay
    Delayed,
}

impl JobState {
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }
}

impl From<String> for JobState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "waiting" => JobState::Waiting,
            "active" => JobState::Active,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            "delayed" => JobState::Delayed,
            _ => JobState::Waiting,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A durable job row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue_name: String,
    pub job_type: String,
    /// Arbitrary JSON payload supplied at enqueue time, possibly patched
    /// later through checkpoint updates
    pub payload: Value,
    pub state: JobState,
    /// Number of executions that have already failed
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub backoff_base_secs: i64,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
    /// Most recent progress value reported by a worker
    pub progress: Option<Value>,
    pub last_error: Option<String>,
    /// Earliest instant the job may be leased
    pub available_at: DateTime<Utc>,
    pub lease_owner: Option<Uuid>,
    pub leased_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// First time any worker picked the job up
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Options accepted at enqueue time
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub max_attempts: i32,
    pub backoff_base_secs: i64,
    /// Delete the row once the job completes (default true)
    pub remove_on_complete: bool,
    /// Delete the row once the job dead-letters (default true)
    pub remove_on_fail: bool,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_secs: DEFAULT_BACKOFF_BASE_SECS,
            remove_on_complete: true,
            remove_on_fail: true,
        }
    }
}

/// Delay in seconds before the next execution, after `attempts_made`
/// executions have failed.
///
/// Exponential in the attempt count: `base * 2^(attempts_made - 1)`, so a
/// 5 second base yields 5s, 10s, 20s, ...
pub fn backoff_delay_secs(base_secs: i64, attempts_made: i32) -> i64 {
    let exp = attempts_made.saturating_sub(1).clamp(0, 62) as u32;
    base_secs.saturating_mul(1_i64 << exp)
}

/// A job held under an active lease.
///
/// Every store mutation made through this handle re-checks the lease owner;
/// if a reclaim sweep took the lease away in the meantime the mutation fails
/// with [`JobError::LeaseLost`] and the execution must stop.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub job: Job,
    pub worker_id: Uuid,
}

impl LeasedJob {
    pub fn id(&self) -> Uuid {
        self.job.id
    }

    /// Decode the payload into a typed value
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.job.payload.clone())
            .map_err(|e| JobError::InvalidPayload(e.to_string()))
    }
}

/// Progress value reported by the import worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// 0-100; capped at 99 until the final flush is confirmed
    pub percentage: u8,
    /// Rows accepted so far in the current execution
    pub count: u64,
}

/// Payload for bulk import jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJobPayload {
    /// CSV file to ingest; removed once the import fully succeeds
    pub file_path: PathBuf,
    /// Account that submitted the import, used for notification routing
    pub owner_id: String,
    /// Caller-supplied row count used for progress percentages
    #[serde(default)]
    pub total_rows_estimate: Option<u64>,
    /// 1-based position of the last input row covered by a durable flush.
    /// Rows at or below this position are skipped when an execution resumes.
    #[serde(default)]
    pub last_processed_row: u64,
}

/// Checkpoint patch merged into an import payload after each flush
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImportCheckpoint {
    pub last_processed_row: u64,
}

/// Payload for single employee creation jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobPayload {
    /// Account that requested the creation, used for notification routing
    pub owner_id: String,
    pub name: String,
    pub age: i64,
    pub position: String,
    pub salary: f64,
}
