//! Job types and the job lifecycle state machine.
//!
//! Every status write in the crate goes through a repository function that
//! checks [`JobStatus::can_transition_to`] and performs a conditional update,
//! so nothing outside this module decides which transitions are legal.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Customer package level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageTier {
    Starter,
    Growth,
    Professional,
    Enterprise,
}

impl PackageTier {
    pub const ALL: [PackageTier; 4] = [
        PackageTier::Starter,
        PackageTier::Growth,
        PackageTier::Professional,
        PackageTier::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageTier::Starter => "starter",
            PackageTier::Growth => "growth",
            PackageTier::Professional => "professional",
            PackageTier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for PackageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a tier name is not one of the known packages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown package tier '{0}'")]
pub struct UnknownTier(pub String);

impl FromStr for PackageTier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starter" => Ok(PackageTier::Starter),
            "growth" => Ok(PackageTier::Growth),
            "professional" => Ok(PackageTier::Professional),
            "enterprise" => Ok(PackageTier::Enterprise),
            _ => Err(UnknownTier(s.to_string())),
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Claimed,
    Processing,
    Completed,
    Failed,
    /// Released too many times; needs an operator.
    Stalled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Queued,
        JobStatus::Claimed,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Stalled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Claimed => "claimed",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stalled => "stalled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Terminal states are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stalled
        )
    }

    /// States in which a worker holds the job.
    pub fn is_held(&self) -> bool {
        matches!(self, JobStatus::Claimed | JobStatus::Processing)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Claimed)
                | (Claimed, Processing)
                | (Claimed, Queued)
                | (Claimed, Stalled)
                | (Claimed, Failed)
                | (Processing, Queued)
                | (Processing, Stalled)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }

    /// All states that may legally move to `next`.
    pub fn sources_of(next: JobStatus) -> Vec<JobStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work: one customer's purchase cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub customer_id: String,
    pub package_tier: PackageTier,
    pub directory_limit: u32,
    pub priority: i64,
    pub status: JobStatus,
    /// Allocated directories, already truncated to `directory_limit`.
    pub directory_ids: Vec<String>,
    pub release_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
