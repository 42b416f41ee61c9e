//! SQLite-backed durable job store
//!
//! Every state transition is a single UPDATE so leasing stays atomic under
//! concurrent workers. Mutations made by a lease holder always match on
//! `lease_owner`; zero affected rows means the lease was reclaimed and the
//! caller gets [`JobError::LeaseLost`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{JobError, Result};
use crate::queue::events::{QueueEvent, QueueEventKind, QueueEvents};
use crate::queue::job::{backoff_delay_secs, EnqueueOptions, Job, JobState, LeasedJob};

/// Columns fetched whenever a full job row is materialized
const JOB_COLUMNS: &str = "id, queue_name, job_type, payload, state, attempts_made, max_attempts, \
    backoff_base_secs, remove_on_complete, remove_on_fail, progress, last_error, available_at, \
    lease_owner, leased_at, heartbeat_at, created_at, processed_at, finished_at";

/// Outcome of recording a failed execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Requeued as delayed; leasable again after `delay_secs`
    Retrying { attempts_made: i32, delay_secs: i64 },
    /// Retry budget exhausted; the job is terminally failed
    DeadLettered { attempts_made: i32 },
}

/// Durable job store shared by producers and workers
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: SqlitePool,
    events: QueueEvents,
}

impl JobStore {
    pub fn new(pool: SqlitePool, events: QueueEvents) -> Self {
        Self { pool, events }
    }

    /// Lifecycle event handle backing this store
    pub fn events(&self) -> &QueueEvents {
        &self.events
    }

    /// Persist a new job in the Waiting state and return its id.
    ///
    /// The job is durable once this returns: a crash immediately afterwards
    /// loses nothing.
    pub async fn enqueue<P: Serialize>(
        &self,
        queue_name: &str,
        job_type: &str,
        payload: &P,
        options: EnqueueOptions,
    ) -> Result<Uuid> {
        let payload =
            serde_json::to_value(payload).map_err(|e| JobError::InvalidPayload(e.to_string()))?;
        let id = Uuid::new_v4();
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            "INSERT INTO jobs (id, queue_name, job_type, payload, state, attempts_made, \
                 max_attempts, backoff_base_secs, remove_on_complete, remove_on_fail, \
                 available_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, 'waiting', 0, ?5, ?6, ?7, ?8, ?9, ?9)",
        )
        .bind(id.to_string())
        .bind(queue_name)
        .bind(job_type)
        .bind(&payload)
        .bind(options.max_attempts)
        .bind(options.backoff_base_secs)
        .bind(options.remove_on_complete)
        .bind(options.remove_on_fail)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %id, queue = queue_name, job_type, "Job enqueued");
        Ok(id)
    }

    /// Atomically claim the oldest due job on a queue.
    ///
    /// Picks from Waiting and Delayed jobs whose `available_at` has passed,
    /// ordered by due time then enqueue time. Returns `None` when nothing is
    /// due. The claim and the state flip happen in one statement, so two
    /// workers can never lease the same job.
    pub async fn lease(&self, queue_name: &str, worker_id: Uuid) -> Result<Option<LeasedJob>> {
        let now = Utc::now().timestamp_millis();
        let sql = format!(
            "UPDATE jobs SET state = 'active', lease_owner = ?1, leased_at = ?2, \
                 heartbeat_at = ?2, processed_at = COALESCE(processed_at, ?2) \
             WHERE id = (SELECT id FROM jobs \
                 WHERE queue_name = ?3 AND state IN ('waiting', 'delayed') AND available_at <= ?2 \
                 ORDER BY available_at ASC, created_at ASC LIMIT 1) \
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(worker_id.to_string())
            .bind(now)
            .bind(queue_name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let job = job_from_row(&row)?;
                debug!(
                    job_id = %job.id,
                    queue = queue_name,
                    worker_id = %worker_id,
                    attempts_made = job.attempts_made,
                    "Job leased"
                );
                Ok(Some(LeasedJob { job, worker_id }))
            }
            None => Ok(None),
        }
    }

    /// Record a successful execution.
    ///
    /// The return value is carried on the Completed lifecycle event. When the
    /// job was enqueued with `remove_on_complete` the row is deleted in the
    /// same statement that validates the lease.
    pub async fn ack(&self, leased: &LeasedJob, return_value: Value) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let affected = if leased.job.remove_on_complete {
            sqlx::query("DELETE FROM jobs WHERE id = ?1 AND lease_owner = ?2 AND state = 'active'")
                .bind(leased.job.id.to_string())
                .bind(leased.worker_id.to_string())
                .execute(&self.pool)
                .await?
                .rows_affected()
        } else {
            sqlx::query(
                "UPDATE jobs SET state = 'completed', finished_at = ?1, lease_owner = NULL, \
                     leased_at = NULL, heartbeat_at = NULL \
                 WHERE id = ?2 AND lease_owner = ?3 AND state = 'active'",
            )
            .bind(now)
            .bind(leased.job.id.to_string())
            .bind(leased.worker_id.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected()
        };

        if affected == 0 {
            return Err(JobError::LeaseLost(leased.job.id));
        }

        info!(job_id = %leased.job.id, queue = %leased.job.queue_name, "Job completed");
        self.events.publish(QueueEvent {
            job_id: leased.job.id,
            queue_name: leased.job.queue_name.clone(),
            job_type: leased.job.job_type.clone(),
            payload: leased.job.payload.clone(),
            kind: QueueEventKind::Completed(return_value),
        });
        Ok(())
    }

    /// Record a failed execution.
    ///
    /// Increments the attempt counter. While the retry budget allows it the
    /// job goes back to Delayed with an exponential backoff delay; otherwise
    /// it dead-letters, which publishes the single Failed lifecycle event for
    /// this job.
    pub async fn fail(&self, leased: &LeasedJob, error_message: &str) -> Result<FailOutcome> {
        let now = Utc::now().timestamp_millis();
        // attempts_made on the right-hand side is the pre-update value, so
        // the delay doubles per completed attempt: base, base*2, base*4, ...
        let row = sqlx::query(
            "UPDATE jobs SET \
                 attempts_made = attempts_made + 1, \
                 state = CASE WHEN attempts_made + 1 >= max_attempts \
                     THEN 'failed' ELSE 'delayed' END, \
                 available_at = CASE WHEN attempts_made + 1 >= max_attempts \
                     THEN available_at \
                     ELSE ?1 + backoff_base_secs * 1000 * (1 << MIN(attempts_made, 30)) END, \
                 finished_at = CASE WHEN attempts_made + 1 >= max_attempts \
                     THEN ?1 ELSE NULL END, \
                 last_error = ?2, \
                 lease_owner = NULL, leased_at = NULL, heartbeat_at = NULL \
             WHERE id = ?3 AND lease_owner = ?4 AND state = 'active' \
             RETURNING attempts_made, max_attempts",
        )
        .bind(now)
        .bind(error_message)
        .bind(leased.job.id.to_string())
        .bind(leased.worker_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(JobError::LeaseLost(leased.job.id));
        };
        let attempts_made: i32 = row.try_get("attempts_made")?;
        let max_attempts: i32 = row.try_get("max_attempts")?;

        if attempts_made >= max_attempts {
            error!(
                job_id = %leased.job.id,
                queue = %leased.job.queue_name,
                attempts_made,
                error = error_message,
                "Job failed permanently"
            );
            if leased.job.remove_on_fail {
                sqlx::query("DELETE FROM jobs WHERE id = ?1 AND state = 'failed'")
                    .bind(leased.job.id.to_string())
                    .execute(&self.pool)
                    .await?;
            }
            self.events.publish(QueueEvent {
                job_id: leased.job.id,
                queue_name: leased.job.queue_name.clone(),
                job_type: leased.job.job_type.clone(),
                payload: leased.job.payload.clone(),
                kind: QueueEventKind::Failed(error_message.to_string()),
            });
            Ok(FailOutcome::DeadLettered { attempts_made })
        } else {
            let delay_secs = backoff_delay_secs(leased.job.backoff_base_secs, attempts_made);
            warn!(
                job_id = %leased.job.id,
                queue = %leased.job.queue_name,
                attempts_made,
                max_attempts,
                delay_secs,
                error = error_message,
                "Job failed, scheduling retry"
            );
            Ok(FailOutcome::Retrying {
                attempts_made,
                delay_secs,
            })
        }
    }

    /// Store a new progress value and publish it on the event channel
    pub async fn update_progress<P: Serialize>(
        &self,
        leased: &LeasedJob,
        progress: &P,
    ) -> Result<()> {
        let value =
            serde_json::to_value(progress).map_err(|e| JobError::InvalidPayload(e.to_string()))?;
        let affected = sqlx::query(
            "UPDATE jobs SET progress = ?1 \
             WHERE id = ?2 AND lease_owner = ?3 AND state = 'active'",
        )
        .bind(&value)
        .bind(leased.job.id.to_string())
        .bind(leased.worker_id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(JobError::LeaseLost(leased.job.id));
        }

        self.events.publish(QueueEvent {
            job_id: leased.job.id,
            queue_name: leased.job.queue_name.clone(),
            job_type: leased.job.job_type.clone(),
            payload: leased.job.payload.clone(),
            kind: QueueEventKind::Progress(value),
        });
        Ok(())
    }

    /// Merge a typed patch into the job's payload.
    ///
    /// The patch must serialize to a JSON object; its top-level keys replace
    /// the matching keys of the stored payload and every other key is kept.
    /// The merged payload is what a later execution sees after a retry, which
    /// is how import checkpoints survive crashes.
    ///
    /// Only the lease holder ever writes the payload, so the read-merge-write
    /// below cannot race with another writer.
    pub async fn update_data<P: Serialize>(&self, leased: &LeasedJob, patch: &P) -> Result<()> {
        let patch =
            serde_json::to_value(patch).map_err(|e| JobError::InvalidPayload(e.to_string()))?;
        let Value::Object(patch_map) = patch else {
            return Err(JobError::InvalidPayload(
                "payload patch must serialize to a JSON object".to_string(),
            ));
        };

        let row = sqlx::query(
            "SELECT payload FROM jobs WHERE id = ?1 AND lease_owner = ?2 AND state = 'active'",
        )
        .bind(leased.job.id.to_string())
        .bind(leased.worker_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Err(JobError::LeaseLost(leased.job.id));
        };

        let mut payload: Value = row.try_get("payload")?;
        let Value::Object(map) = &mut payload else {
            return Err(JobError::InvalidPayload(
                "stored payload is not a JSON object".to_string(),
            ));
        };
        for (key, value) in patch_map {
            map.insert(key, value);
        }

        let affected = sqlx::query(
            "UPDATE jobs SET payload = ?1 \
             WHERE id = ?2 AND lease_owner = ?3 AND state = 'active'",
        )
        .bind(&payload)
        .bind(leased.job.id.to_string())
        .bind(leased.worker_id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(JobError::LeaseLost(leased.job.id));
        }
        Ok(())
    }

    /// Refresh the lease heartbeat so the reclaim sweep leaves the job alone
    pub async fn heartbeat(&self, leased: &LeasedJob) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let affected = sqlx::query(
            "UPDATE jobs SET heartbeat_at = ?1 \
             WHERE id = ?2 AND lease_owner = ?3 AND state = 'active'",
        )
        .bind(now)
        .bind(leased.job.id.to_string())
        .bind(leased.worker_id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(JobError::LeaseLost(leased.job.id));
        }
        Ok(())
    }

    /// Return Active jobs whose heartbeat went stale to the Waiting state.
    ///
    /// A stale heartbeat means the holding worker crashed or lost its lease
    /// mid-flight, not that the execution itself failed, so the attempt
    /// counter is left untouched. Reclaimed jobs become leasable immediately.
    pub async fn reclaim_stale(
        &self,
        queue_name: &str,
        lease_timeout: Duration,
    ) -> Result<Vec<Uuid>> {
        let now = Utc::now().timestamp_millis();
        let cutoff = now - lease_timeout.as_millis() as i64;

        let rows = sqlx::query(
            "UPDATE jobs SET state = 'waiting', lease_owner = NULL, leased_at = NULL, \
                 heartbeat_at = NULL \
             WHERE queue_name = ?1 AND state = 'active' \
                 AND heartbeat_at IS NOT NULL AND heartbeat_at < ?2 \
             RETURNING id",
        )
        .bind(queue_name)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut reclaimed = Vec::with_capacity(rows.len());
        for row in &rows {
            reclaimed.push(parse_uuid(row.try_get::<String, _>("id")?.as_str())?);
        }
        if !reclaimed.is_empty() {
            warn!(
                queue = queue_name,
                reclaimed = reclaimed.len(),
                "Reclaimed jobs from stale leases"
            );
        }
        Ok(reclaimed)
    }

    /// Delete every job on a queue that is not currently executing
    pub async fn drain(&self, queue_name: &str) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM jobs WHERE queue_name = ?1 AND state != 'active'")
            .bind(queue_name)
            .execute(&self.pool)
            .await?
            .rows_affected();
        info!(queue = queue_name, removed, "Queue drained");
        Ok(removed)
    }

    /// Delete every job on a queue, including Active ones.
    ///
    /// In-flight executions keep running but their later ack or fail resolves
    /// to [`JobError::LeaseLost`].
    pub async fn purge(&self, queue_name: &str) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM jobs WHERE queue_name = ?1")
            .bind(queue_name)
            .execute(&self.pool)
            .await?
            .rows_affected();
        info!(queue = queue_name, removed, "Queue purged");
        Ok(removed)
    }

    /// Fetch a job by id
    pub async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| job_from_row(&row)).transpose()
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| JobError::InvalidPayload(format!("invalid job id '{s}': {e}")))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let id: String = row.try_get("id")?;
    let state: String = row.try_get("state")?;
    let lease_owner: Option<String> = row.try_get("lease_owner")?;

    Ok(Job {
        id: parse_uuid(&id)?,
        queue_name: row.try_get("queue_name")?,
        job_type: row.try_get("job_type")?,
        payload: row.try_get("payload")?,
        state: JobState::from(state),
        attempts_made: row.try_get("attempts_made")?,
        max_attempts: row.try_get("max_attempts")?,
        backoff_base_secs: row.try_get("backoff_base_secs")?,
        remove_on_complete: row.try_get("remove_on_complete")?,
        remove_on_fail: row.try_get("remove_on_fail")?,
        progress: row.try_get("progress")?,
        last_error: row.try_get("last_error")?,
        available_at: from_millis(row.try_get("available_at")?),
        lease_owner: lease_owner.as_deref().map(parse_uuid).transpose()?,
        leased_at: row.try_get::<Option<i64>, _>("leased_at")?.map(from_millis),
        heartbeat_at: row
            .try_get::<Option<i64>, _>("heartbeat_at")?
            .map(from_millis),
        created_at: from_millis(row.try_get("created_at")?),
        processed_at: row
            .try_get::<Option<i64>, _>("processed_at")?
            .map(from_millis),
        finished_at: row
            .try_get::<Option<i64>, _>("finished_at")?
            .map(from_millis),
    })
}
