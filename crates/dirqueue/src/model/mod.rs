//! Domain types shared by the queue, the processor and the coordinator.

pub mod entry;
pub mod job;
pub mod worker;

pub use entry::{EntryCounts, EntryStatus, SubmissionEntry};
pub use job::{Job, JobStatus, PackageTier, UnknownTier};
pub use worker::{ControlSnapshot, WorkerRegistration, WorkerStatus};
