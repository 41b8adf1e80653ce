//! Submission ledger entries: one per (job, directory).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
}

impl EntryStatus {
    pub const ALL: [EntryStatus; 5] = [
        EntryStatus::Pending,
        EntryStatus::InProgress,
        EntryStatus::Succeeded,
        EntryStatus::Failed,
        EntryStatus::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::InProgress => "in_progress",
            EntryStatus::Succeeded => "succeeded",
            EntryStatus::Failed => "failed",
            EntryStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EntryStatus::Succeeded | EntryStatus::Failed | EntryStatus::Skipped
        )
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionEntry {
    pub id: String,
    pub job_id: String,
    pub directory_id: String,
    pub position: u32,
    pub status: EntryStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SubmissionEntry {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn attempts_left(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_count)
    }
}

/// Per-status entry counts for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryCounts {
    pub pending: u32,
    pub in_progress: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl EntryCounts {
    pub fn add(&mut self, status: EntryStatus, n: u32) {
        match status {
            EntryStatus::Pending => self.pending += n,
            EntryStatus::InProgress => self.in_progress += n,
            EntryStatus::Succeeded => self.succeeded += n,
            EntryStatus::Failed => self.failed += n,
            EntryStatus::Skipped => self.skipped += n,
        }
    }

    pub fn total(&self) -> u32 {
        self.pending + self.in_progress + self.succeeded + self.failed + self.skipped
    }

    pub fn open(&self) -> u32 {
        self.pending + self.in_progress
    }
}
