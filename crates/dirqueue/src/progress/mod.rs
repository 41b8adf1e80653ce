//! Read-only progress views for operators.

pub mod reporter;

pub use reporter::{JobProgress, ProgressReporter, QueueSummary, WorkerCounts};
