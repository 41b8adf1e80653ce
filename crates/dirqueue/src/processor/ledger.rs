//! Submission ledger: the single write path for attempt outcomes.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::entry_repo;
use crate::db::Database;
use crate::error::ProcessError;
use crate::model::SubmissionEntry;
use crate::processor::executor::{AttemptResult, FailureKind};

/// An attempt outcome as reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReportedOutcome {
    Succeeded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_url: Option<String>,
    },
    Failed { kind: FailureKind, error: String },
}

impl From<AttemptResult> for ReportedOutcome {
    fn from(result: AttemptResult) -> Self {
        match result {
            AttemptResult::Succeeded { result_url } => ReportedOutcome::Succeeded { result_url },
            AttemptResult::Failed { kind, message } => ReportedOutcome::Failed {
                kind,
                error: format!("{}: {}", kind, message),
            },
        }
    }
}

/// The entry after a report, and whether the report changed it.
#[derive(Debug, Clone)]
pub struct LedgerUpdate {
    pub entry: SubmissionEntry,
    pub applied: bool,
}

#[derive(Clone)]
pub struct SubmissionLedger {
    db: Database,
}

impl SubmissionLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Records the outcome of one attempt against `(job_id, directory_id)`.
    ///
    /// Reporting against an entry that is already terminal changes nothing
    /// and returns the stored state with `applied = false`.
    pub fn report_outcome(
        &self,
        job_id: &str,
        directory_id: &str,
        outcome: ReportedOutcome,
    ) -> Result<LedgerUpdate, ProcessError> {
        let current = self.entry(job_id, directory_id)?;
        if current.is_terminal() {
            log::debug!(
                "Ignoring outcome for {}/{}: entry already {}",
                job_id,
                directory_id,
                current.status
            );
            return Ok(LedgerUpdate {
                entry: current,
                applied: false,
            });
        }

        let now = Utc::now();
        let applied = match &outcome {
            ReportedOutcome::Succeeded { result_url } => entry_repo::record_success(
                &self.db,
                job_id,
                directory_id,
                result_url.as_deref(),
                now,
            )?,
            ReportedOutcome::Failed { kind, error } => entry_repo::record_failure(
                &self.db,
                job_id,
                directory_id,
                error,
                !kind.is_recoverable(),
                now,
            )?,
        };

        Ok(LedgerUpdate {
            entry: self.entry(job_id, directory_id)?,
            applied,
        })
    }

    pub fn entry(&self, job_id: &str, directory_id: &str) -> Result<SubmissionEntry, ProcessError> {
        entry_repo::find(&self.db, job_id, directory_id)?
            .ok_or_else(|| ProcessError::EntryNotFound {
                job_id: job_id.to_string(),
                directory_id: directory_id.to_string(),
            })?
            .into_entry()
            .map_err(ProcessError::from)
    }

    /// A job's entries in processing order.
    pub fn entries(&self, job_id: &str) -> Result<Vec<SubmissionEntry>, ProcessError> {
        entry_repo::list_for_job(&self.db, job_id)?
            .into_iter()
            .map(|row| row.into_entry().map_err(ProcessError::from))
            .collect()
    }
}
