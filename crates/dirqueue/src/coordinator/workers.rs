//! Worker coordination: heartbeats, assignment and liveness reaping.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::Directory;
use crate::db::{job_repo, worker_repo, Database};
use crate::error::CoordinatorError;
use crate::model::{ControlSnapshot, Job, JobStatus, WorkerRegistration, WorkerStatus};
use crate::queue::QueueManager;

use super::control::ControlPlane;

/// Reply to a heartbeat: the worker's recorded state plus the current
/// control record, so workers learn about stops without a separate poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAck {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub control: ControlSnapshot,
}

/// A job handed to a worker, with its directories resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedJob {
    pub job: Job,
    pub directories: Vec<Directory>,
    pub control: ControlSnapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReapReport {
    pub offline_workers: Vec<String>,
    /// Released jobs and the status each ended in (`queued` or `stalled`).
    pub released_jobs: Vec<(String, JobStatus)>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.offline_workers.is_empty() && self.released_jobs.is_empty()
    }
}

#[derive(Clone)]
pub struct WorkerCoordinator {
    db: Database,
    queue: QueueManager,
    control: ControlPlane,
    liveness_window: Duration,
}

impl WorkerCoordinator {
    pub fn new(queue: QueueManager, liveness_window: Duration) -> Self {
        let db = queue.database().clone();
        Self {
            control: ControlPlane::new(db.clone()),
            db,
            queue,
            liveness_window,
        }
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn control(&self) -> &ControlPlane {
        &self.control
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    pub fn heartbeat(
        &self,
        worker_id: &str,
        status: WorkerStatus,
    ) -> Result<HeartbeatAck, CoordinatorError> {
        self.heartbeat_at(worker_id, status, Utc::now())
    }

    /// Records a heartbeat at `now`. Reporting `offline` signs the worker
    /// off and releases whatever it still holds.
    pub fn heartbeat_at(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        now: DateTime<Utc>,
    ) -> Result<HeartbeatAck, CoordinatorError> {
        let control = self.control.snapshot()?;

        if status == WorkerStatus::Offline {
            self.sign_off_at(worker_id, now)?;
            return Ok(HeartbeatAck {
                worker_id: worker_id.to_string(),
                status: WorkerStatus::Offline,
                control,
            });
        }

        let row = worker_repo::upsert_heartbeat(&self.db, worker_id, status, control.version, now)?
            .into_registration()?;
        log::debug!("Heartbeat from {} ({})", worker_id, row.status);

        Ok(HeartbeatAck {
            worker_id: row.worker_id,
            status: row.status,
            control,
        })
    }

    /// The Claim API: hands the next job to an idle worker.
    pub fn claim(&self, worker_id: &str) -> Result<Option<ClaimedJob>, CoordinatorError> {
        let control = self.control.snapshot()?;
        worker_repo::upsert_heartbeat(
            &self.db,
            worker_id,
            WorkerStatus::Idle,
            control.version,
            Utc::now(),
        )?;

        let Some(job) = self.queue.claim_next(worker_id)? else {
            return Ok(None);
        };
        worker_repo::set_assignment(&self.db, worker_id, WorkerStatus::Processing, Some(&job.id))?;

        let directories = job
            .directory_ids
            .iter()
            .filter_map(|id| self.queue.catalog().get(id))
            .collect();

        Ok(Some(ClaimedJob {
            job,
            directories,
            control,
        }))
    }

    /// Returns a worker to `idle` after its job ended. A job the worker
    /// still holds is released rather than left claimed.
    pub fn finish(&self, worker_id: &str, job_id: &str) -> Result<(), CoordinatorError> {
        let job = self.queue.get(job_id)?;
        if job.status.is_held() && job.claimed_by.as_deref() == Some(worker_id) {
            log::warn!(
                "Worker {} finished job {} while it was still {}; releasing",
                worker_id,
                job_id,
                job.status
            );
            self.queue
                .release_held(job_id, worker_id, "worker finished without a result", Utc::now())?;
        }
        worker_repo::set_assignment(&self.db, worker_id, WorkerStatus::Idle, None)?;
        Ok(())
    }

    /// Graceful departure: offline now, held jobs back to the queue.
    pub fn sign_off(&self, worker_id: &str) -> Result<Vec<(String, JobStatus)>, CoordinatorError> {
        self.sign_off_at(worker_id, Utc::now())
    }

    fn sign_off_at(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, JobStatus)>, CoordinatorError> {
        worker_repo::mark_offline(&self.db, worker_id, None)?;
        let released = self.release_all_held(worker_id, "worker signed off", now)?;
        log::info!(
            "Worker {} signed off ({} job(s) released)",
            worker_id,
            released.len()
        );
        Ok(released)
    }

    /// Marks workers whose last heartbeat is older than the liveness window
    /// as offline and releases their jobs. Each worker and each job is
    /// handled at most once, even with several reapers running.
    pub fn reap_expired(&self, now: DateTime<Utc>) -> Result<ReapReport, CoordinatorError> {
        let window = chrono::Duration::from_std(self.liveness_window)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let cutoff = now - window;

        let mut report = ReapReport::default();
        for worker in worker_repo::find_expired(&self.db, cutoff)? {
            if !worker_repo::mark_offline(&self.db, &worker.worker_id, Some(cutoff))? {
                continue;
            }
            log::warn!(
                "Worker {} missed heartbeats since {}; marked offline",
                worker.worker_id,
                worker.last_heartbeat_at
            );
            let released =
                self.release_all_held(&worker.worker_id, "worker heartbeat expired", now)?;
            report.released_jobs.extend(released);
            report.offline_workers.push(worker.worker_id);
        }

        // Jobs still held by workers already offline, left over from a sweep
        // or sign-off that failed partway.
        for (job_id, worker_id) in job_repo::held_by_offline_workers(&self.db)? {
            let reason = "holder went offline";
            if let Some(status) = self.queue.release_held(&job_id, &worker_id, reason, now)? {
                log::warn!(
                    "Released job {} still held by offline worker {}",
                    job_id,
                    worker_id
                );
                report.released_jobs.push((job_id, status));
            }
        }
        Ok(report)
    }

    fn release_all_held(
        &self,
        worker_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, JobStatus)>, CoordinatorError> {
        let mut released = Vec::new();
        for job_id in job_repo::held_by(&self.db, worker_id)? {
            if let Some(status) = self.queue.release_held(&job_id, worker_id, reason, now)? {
                released.push((job_id, status));
            }
        }
        Ok(released)
    }

    pub fn list_workers(&self) -> Result<Vec<WorkerRegistration>, CoordinatorError> {
        worker_repo::list(&self.db)?
            .into_iter()
            .map(|row| row.into_registration().map_err(CoordinatorError::from))
            .collect()
    }

    pub fn worker(&self, worker_id: &str) -> Result<Option<WorkerRegistration>, CoordinatorError> {
        match worker_repo::find(&self.db, worker_id)? {
            Some(row) => Ok(Some(row.into_registration()?)),
            None => Ok(None),
        }
    }
}
