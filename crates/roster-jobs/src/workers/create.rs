//! Single employee creation worker
//!
//! Deliberately slow: each creation sleeps before inserting, modeling the
//! sluggish downstream dependency that motivated queueing creations in the
//! first place.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::Result;
use crate::queue::{CreateJobPayload, EMPLOYEE_QUEUE};
use crate::records::{NewEmployee, RecordStore};
use crate::workers::{JobContext, JobHandler};

/// Artificial processing delay per creation
pub const DEFAULT_CREATE_DELAY: Duration = Duration::from_secs(2);

/// Worker consuming the employee queue
pub struct CreateWorker {
    records: Arc<dyn RecordStore>,
    delay: Duration,
}

impl CreateWorker {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self {
            records,
            delay: DEFAULT_CREATE_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl JobHandler for CreateWorker {
    fn queue_name(&self) -> &'static str {
        EMPLOYEE_QUEUE
    }

    /// At-least-once: there is no idempotency key, so a retry racing an
    /// insert that actually landed can produce a duplicate attempt (which
    /// the store then rejects by name).
    async fn handle(&self, ctx: &JobContext) -> Result<Value> {
        let payload: CreateJobPayload = ctx.payload()?;

        tokio::time::sleep(self.delay).await;

        let employee = self
            .records
            .create(NewEmployee {
                name: payload.name,
                age: payload.age,
                position: payload.position,
                salary: payload.salary,
            })
            .await?;

        info!(
            job_id = %ctx.job().id(),
            employee_id = %employee.id,
            "Employee created"
        );
        Ok(serde_json::to_value(&employee)?)
    }
}
