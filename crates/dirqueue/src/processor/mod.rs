//! Submission processing: attempts, retries and the job roll-up.

pub mod backoff;
pub mod executor;
pub mod ledger;
pub mod runner;

pub use backoff::RetryPolicy;
pub use executor::{
    AttemptResult, FailureKind, SubmissionExecutor, SubmissionRequest, TimedExecutor,
};
pub use ledger::{LedgerUpdate, ReportedOutcome, SubmissionLedger};
pub use runner::{ProcessOutcome, SubmissionProcessor, ABORT_SUMMARY};
