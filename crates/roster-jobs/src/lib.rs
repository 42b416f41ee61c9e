//! Roster jobs pipeline
//!
//! Asynchronous, crash-resumable ingestion for employee records. Producers
//! enqueue work into a SQLite-backed durable queue; polling workers lease
//! jobs, execute them with heartbeats and exponential-backoff retries, and
//! publish their outcomes as user-facing notifications.
//!
//! Two kinds of work flow through:
//! - bulk CSV imports, streamed in batches with a durable resume checkpoint
//! - single employee creations, deliberately slow and therefore queued
//!
//! The queue survives restarts; notifications do not. Employee storage
//! itself sits behind the [`records::RecordStore`] trait.

pub mod config;
pub mod csv_rows;
pub mod error;
pub mod notifier;
pub mod notify;
pub mod queue;
pub mod records;
pub mod workers;

pub use error::{JobError, Result};
