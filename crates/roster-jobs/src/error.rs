//! Error types for the jobs pipeline

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias using our pipeline error type
pub type Result<T> = std::result::Result<T, JobError>;

/// Errors produced by the queue, workers, and their supporting pieces
#[derive(Error, Debug)]
pub enum JobError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database migration failed
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization or deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV decoding failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv_async::Error),

    /// Job payload could not be serialized, merged, or decoded
    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    /// Job does not exist
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// The lease on a job was reclaimed while a worker still held it.
    /// Any in-flight execution must stop mutating the job.
    #[error("Lease lost for job {0}")]
    LeaseLost(Uuid),

    /// Import source file is missing or unreadable
    #[error("Source file unavailable: {}", .0.display())]
    SourceUnavailable(PathBuf),

    /// Record store rejected an operation
    #[error("Record store error: {0}")]
    RecordStore(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from the shared roster library
    #[error("Roster error: {0}")]
    Common(#[from] roster_common::RosterError),
}
