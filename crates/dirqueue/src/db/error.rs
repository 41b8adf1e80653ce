//! Errors raised by the queue store.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    /// A statement against the queue database failed, including busy and
    /// constraint errors from concurrent workers.
    #[error("queue store query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The directory holding the queue database could not be created.
    #[error("cannot prepare queue database directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("queue schema migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored status, tier or timestamp that no longer decodes, e.g. a
    /// row written by a newer schema.
    #[error("unreadable {column} in queue store: '{value}'")]
    Corrupt { column: &'static str, value: String },

    /// A thread panicked while holding the shared connection.
    #[error("queue store connection lock poisoned")]
    LockPoisoned,
}
