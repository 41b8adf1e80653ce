use std::path::PathBuf;
use thiserror::Error;

use crate::model::JobStatus;

#[derive(Error, Debug)]
pub enum DirQueueError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] crate::catalog::CatalogError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Unknown package tier '{0}'")]
    InvalidTier(String),

    #[error("No allocated directory resolved against the catalog")]
    EmptyAllocation,

    #[error("Invalid customer id: {0}")]
    InvalidCustomer(String),

    #[error("Emergency stop is active")]
    EmergencyStopActive,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job '{id}' cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ProcessError {
    /// The job was released from under this worker.
    #[error("Claim on job '{job_id}' lost by worker '{worker_id}'")]
    ClaimLost { job_id: String, worker_id: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job '{job_id}' is not claimed by worker '{worker_id}'")]
    NotClaimed { job_id: String, worker_id: String },

    #[error("Entry for directory '{directory_id}' not found in job '{job_id}'")]
    EntryNotFound { job_id: String, directory_id: String },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Failed to spawn thread: {0}")]
    SpawnFailed(String),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, DirQueueError>;
