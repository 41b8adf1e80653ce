//! Read model over jobs and the ledger for staff dashboards.

use serde::{Deserialize, Serialize};

use crate::db::{control_repo, entry_repo, worker_repo};
use crate::error::QueueError;
use crate::model::{ControlSnapshot, EntryCounts, EntryStatus, JobStatus, PackageTier, WorkerStatus};
use crate::queue::{QueueCounts, QueueManager};

/// Progress of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: String,
    pub status: JobStatus,
    pub package_tier: PackageTier,
    /// Share of the allocation with a final outcome (succeeded or failed).
    pub percentage: f64,
    /// `None` until the tier has finished entries to estimate from.
    pub eta_seconds: Option<u64>,
    pub failed_directories: Vec<String>,
    pub counts: EntryCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCounts {
    pub idle: u64,
    pub processing: u64,
    pub offline: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    pub jobs: QueueCounts,
    pub workers: WorkerCounts,
    pub control: ControlSnapshot,
}

#[derive(Clone)]
pub struct ProgressReporter {
    queue: QueueManager,
    eta_window: u32,
}

impl ProgressReporter {
    pub fn new(queue: QueueManager, eta_window: u32) -> Self {
        Self { queue, eta_window }
    }

    /// Never writes; safe to call while the job is being processed.
    pub fn progress(&self, job_id: &str) -> Result<JobProgress, QueueError> {
        let job = self.queue.get(job_id)?;
        let db = self.queue.database();
        let entries = entry_repo::list_for_job(db, job_id)?;

        let mut counts = EntryCounts::default();
        let mut failed_directories = Vec::new();
        for row in entries {
            let entry = row.into_entry()?;
            counts.add(entry.status, 1);
            if entry.status == EntryStatus::Failed {
                failed_directories.push(entry.directory_id);
            }
        }

        let finished = counts.succeeded + counts.failed;
        let percentage = if job.directory_limit == 0 {
            0.0
        } else {
            f64::from(finished) / f64::from(job.directory_limit) * 100.0
        };

        let eta_seconds = if job.is_terminal() {
            Some(0)
        } else {
            // Entries not materialized yet still count as remaining.
            let remaining = job.directory_limit.saturating_sub(finished + counts.skipped);
            self.average_duration(job.package_tier)?
                .map(|avg| (avg * f64::from(remaining)).round() as u64)
        };

        Ok(JobProgress {
            job_id: job.id,
            status: job.status,
            package_tier: job.package_tier,
            percentage,
            eta_seconds,
            failed_directories,
            counts,
            error_summary: job.error_summary,
        })
    }

    fn average_duration(&self, tier: PackageTier) -> Result<Option<f64>, QueueError> {
        let samples = entry_repo::recent_durations(self.queue.database(), tier, self.eta_window)?;
        if samples.is_empty() {
            return Ok(None);
        }
        Ok(Some(samples.iter().sum::<f64>() / samples.len() as f64))
    }

    pub fn queue_summary(&self) -> Result<QueueSummary, QueueError> {
        let db = self.queue.database();
        let mut workers = WorkerCounts::default();
        for row in worker_repo::list(db)? {
            match row.into_registration()?.status {
                WorkerStatus::Idle => workers.idle += 1,
                WorkerStatus::Processing => workers.processing += 1,
                WorkerStatus::Offline => workers.offline += 1,
            }
        }

        Ok(QueueSummary {
            jobs: self.queue.counts()?,
            workers,
            control: control_repo::read(db)?,
        })
    }
}
