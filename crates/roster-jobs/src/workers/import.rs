//! Resumable bulk CSV import worker
//!
//! Streams the source file row by row, accumulates validated rows into
//! batches, and flushes each batch with a duplicate-skipping bulk insert.
//! After every flush the input position is checkpointed into the job
//! payload, so a crashed or failed execution resumes past the rows already
//! covered instead of starting over.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::csv_rows::{CsvRow, RowStream};
use crate::error::{JobError, Result};
use crate::queue::{ImportCheckpoint, ImportJobPayload, JobProgress, IMPORT_QUEUE};
use crate::records::{NewEmployee, RecordStore};
use crate::workers::{JobContext, JobHandler};

/// Rows accumulated before a bulk flush
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Assumed input size when the submitter provides no row estimate; progress
/// percentages are computed against it
pub const DEFAULT_TOTAL_ROWS_ESTIMATE: u64 = 20_000;

/// Observation hooks for the import pipeline.
///
/// Row rejection is silent by contract; the hook exists so operators and
/// tests can count what was dropped without changing that.
#[derive(Clone, Default)]
pub struct ImportHooks {
    /// Called with the 1-based input position of every row dropped by
    /// validation
    pub on_dropped_row: Option<Arc<dyn Fn(u64) + Send + Sync>>,
}

/// Worker consuming the import queue
pub struct ImportWorker {
    records: Arc<dyn RecordStore>,
    batch_size: usize,
    default_total_rows: u64,
    hooks: ImportHooks,
}

impl ImportWorker {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self {
            records,
            batch_size: DEFAULT_BATCH_SIZE,
            default_total_rows: DEFAULT_TOTAL_ROWS_ESTIMATE,
            hooks: ImportHooks::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_hooks(mut self, hooks: ImportHooks) -> Self {
        self.hooks = hooks;
        self
    }

    async fn flush(&self, batch: &[NewEmployee]) -> Result<u64> {
        let inserted = self.records.create_many(batch).await?;
        debug!(rows = batch.len(), inserted, "Flushed import batch");
        Ok(inserted)
    }

    fn drop_row(&self, position: u64) {
        if let Some(hook) = &self.hooks.on_dropped_row {
            hook(position);
        }
    }
}

#[async_trait]
impl JobHandler for ImportWorker {
    fn queue_name(&self) -> &'static str {
        IMPORT_QUEUE
    }

    async fn handle(&self, ctx: &JobContext) -> Result<Value> {
        let payload: ImportJobPayload = ctx.payload()?;

        // The source file must exist for this execution to proceed; a
        // missing file is a failed attempt like any other.
        if tokio::fs::metadata(&payload.file_path).await.is_err() {
            return Err(JobError::SourceUnavailable(payload.file_path));
        }

        let total = payload
            .total_rows_estimate
            .unwrap_or(self.default_total_rows)
            .max(1);
        let resume_from = payload.last_processed_row;
        if resume_from > 0 {
            info!(
                job_id = %ctx.job().id(),
                resume_from,
                "Resuming import past durable checkpoint"
            );
        }

        let mut rows = RowStream::open(&payload.file_path).await?;
        let mut batch: Vec<NewEmployee> = Vec::with_capacity(self.batch_size);
        let mut count: u64 = 0;

        while let Some(row) = rows.try_next().await? {
            // Rows at or below the checkpoint were flushed by an earlier
            // execution; skipping them is the whole resume mechanism.
            if row.position <= resume_from {
                continue;
            }
            let Some(employee) = parse_employee(&row) else {
                self.drop_row(row.position);
                continue;
            };
            batch.push(employee);

            if batch.len() >= self.batch_size {
                // Flush before checkpoint: a crash between the two re-runs
                // the batch and the duplicate-skip insert absorbs it.
                self.flush(&batch).await?;
                count += batch.len() as u64;
                batch.clear();
                ctx.checkpoint(&ImportCheckpoint {
                    last_processed_row: row.position,
                })
                .await?;
                ctx.update_progress(&JobProgress {
                    percentage: progress_percentage(count, total),
                    count,
                })
                .await?;
            }
        }

        // Finalize: the remainder goes through the same duplicate-skip
        // insert as every full batch.
        if !batch.is_empty() {
            self.flush(&batch).await?;
            count += batch.len() as u64;
            ctx.checkpoint(&ImportCheckpoint {
                last_processed_row: rows.position(),
            })
            .await?;
        }
        ctx.update_progress(&JobProgress {
            percentage: 100,
            count,
        })
        .await?;

        // Cleanup is best-effort: the import already succeeded, a leftover
        // file must not fail it.
        if let Err(e) = tokio::fs::remove_file(&payload.file_path).await {
            warn!(
                path = %payload.file_path.display(),
                error = %e,
                "Import succeeded but source file could not be removed"
            );
        }

        info!(job_id = %ctx.job().id(), count, "Import completed");
        Ok(json!({ "count": count }))
    }
}

/// Validate one row into an insertable record.
///
/// `name` must be non-empty and `age` must parse as an integer; `position`
/// defaults to "Unknown" and `salary` to 0.0 when missing or malformed.
/// Returns `None` for rows that should be dropped.
fn parse_employee(row: &CsvRow) -> Option<NewEmployee> {
    let name = row.get("name").filter(|name| !name.is_empty())?;
    let age = row.get("age")?.parse::<i64>().ok()?;
    let position = row
        .get("position")
        .filter(|position| !position.is_empty())
        .unwrap_or("Unknown");
    let salary = row
        .get("salary")
        .and_then(|salary| salary.parse::<f64>().ok())
        .filter(|salary| salary.is_finite())
        .unwrap_or(0.0);
    Some(NewEmployee {
        name: name.to_string(),
        age,
        position: position.to_string(),
        salary,
    })
}

/// Percentage against the row estimate, capped at 99.
/// 100 is reserved for the finalize step after the last flush is durable.
fn progress_percentage(count: u64, total: u64) -> u8 {
    let percentage = ((count as f64 / total as f64) * 100.0).round() as u64;
    percentage.min(99) as u8
}
