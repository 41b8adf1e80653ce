//! Queue manager: enqueue, dispatch order, atomic claiming and release.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broadcast::{JobEvent, JobEventKind, NoopProgress, ProgressSink};
use crate::catalog::DirectoryCatalog;
use crate::config::QueueConfig;
use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::{control_repo, Database};
use crate::error::QueueError;
use crate::model::{Job, JobStatus, PackageTier};

/// Input to [`QueueManager::enqueue`]. The tier is raw so unknown names
/// surface as [`QueueError::InvalidTier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub customer_id: String,
    pub package_tier: String,
    pub directory_ids: Vec<String>,
}

impl EnqueueRequest {
    pub fn new(
        customer_id: impl Into<String>,
        package_tier: impl Into<String>,
        directory_ids: Vec<String>,
    ) -> Self {
        Self {
            customer_id: customer_id.into(),
            package_tier: package_tier.into(),
            directory_ids,
        }
    }
}

/// Jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub queued: u64,
    pub claimed: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub stalled: u64,
}

impl QueueCounts {
    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Queued => self.queued,
            JobStatus::Claimed => self.claimed,
            JobStatus::Processing => self.processing,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
            JobStatus::Stalled => self.stalled,
        }
    }

    fn set(&mut self, status: JobStatus, n: u64) {
        match status {
            JobStatus::Queued => self.queued = n,
            JobStatus::Claimed => self.claimed = n,
            JobStatus::Processing => self.processing = n,
            JobStatus::Completed => self.completed = n,
            JobStatus::Failed => self.failed = n,
            JobStatus::Stalled => self.stalled = n,
        }
    }

    pub fn total(&self) -> u64 {
        JobStatus::ALL.into_iter().map(|s| self.get(s)).sum()
    }
}

/// Owns the job queue. Cheap to clone; all state lives in the database.
#[derive(Clone)]
pub struct QueueManager {
    db: Database,
    catalog: Arc<dyn DirectoryCatalog>,
    config: QueueConfig,
    progress: Arc<dyn ProgressSink>,
}

impl QueueManager {
    pub fn new(db: Database, catalog: Arc<dyn DirectoryCatalog>, config: QueueConfig) -> Self {
        Self {
            db,
            catalog,
            config,
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn catalog(&self) -> &Arc<dyn DirectoryCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Validates the request, resolves its directories against the catalog
    /// and stores a new `queued` job.
    pub fn enqueue(&self, request: &EnqueueRequest) -> Result<Job, QueueError> {
        let customer_id = request.customer_id.trim();
        if customer_id.is_empty() {
            return Err(QueueError::InvalidCustomer(
                "customer id must not be empty".to_string(),
            ));
        }

        let tier: PackageTier = request
            .package_tier
            .parse()
            .map_err(|_| QueueError::InvalidTier(request.package_tier.clone()))?;
        let settings = self.config.tiers.get(tier);

        let mut resolved = self.resolve_directories(&request.directory_ids);
        if resolved.is_empty() {
            return Err(QueueError::EmptyAllocation);
        }
        let limit = settings.directory_limit as usize;
        if resolved.len() > limit {
            log::info!(
                "Truncating allocation for customer {} from {} to {} directories ({} limit)",
                customer_id,
                resolved.len(),
                limit,
                tier
            );
            resolved.truncate(limit);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let row = JobRow::new_queued(
            &id,
            customer_id,
            tier,
            settings.priority,
            &resolved,
            Utc::now(),
        )?;
        job_repo::insert(&self.db, &row)?;
        let job = row.into_job()?;

        log::info!(
            "Enqueued job {} for customer {} ({}, {} directories, priority {})",
            job.id,
            job.customer_id,
            tier,
            job.directory_limit,
            job.priority
        );
        self.progress.emit(JobEvent::new(
            &job.id,
            JobEventKind::Enqueued,
            format!("{} directories queued", job.directory_limit),
        ));

        Ok(job)
    }

    /// Trims, de-duplicates (first occurrence wins) and drops ids the
    /// catalog does not know.
    fn resolve_directories(&self, requested: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for raw in requested {
            let id = raw.trim();
            if id.is_empty() || !seen.insert(id) {
                continue;
            }
            if self.catalog.get(id).is_none() {
                log::warn!("Dropping unknown directory '{}' from allocation", id);
                continue;
            }
            resolved.push(id.to_string());
        }
        resolved
    }

    /// Atomically claims the next job in dispatch order for `worker_id`.
    ///
    /// Returns `Ok(None)` when nothing is queued or the queue is paused, and
    /// `EmergencyStopActive` while the stop is in force.
    pub fn claim_next(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        let control = control_repo::read(&self.db)?;
        if control.emergency_stop {
            return Err(QueueError::EmergencyStopActive);
        }
        if control.queue_paused {
            log::debug!("Queue paused; worker {} gets nothing", worker_id);
            return Ok(None);
        }

        loop {
            let Some(candidate) = job_repo::next_candidate(&self.db)? else {
                return Ok(None);
            };

            if job_repo::try_claim(&self.db, &candidate, worker_id, Utc::now())? {
                let job = self.get(&candidate)?;
                log::info!(
                    "Worker {} claimed job {} (priority {})",
                    worker_id,
                    job.id,
                    job.priority
                );
                self.progress.emit(
                    JobEvent::new(&job.id, JobEventKind::Claimed, "claimed").with_worker(worker_id),
                );
                return Ok(Some(job));
            }

            log::debug!(
                "Lost claim race for job {}, worker {} retrying",
                candidate,
                worker_id
            );
        }
    }

    /// Returns a held job to the queue without counting it as a failure.
    ///
    /// Once the job has been released more than `max_release_count` times it
    /// becomes `stalled` instead. Returns the resulting status.
    pub fn release(&self, job_id: &str, reason: &str) -> Result<JobStatus, QueueError> {
        let job = self.get(job_id)?;
        if !job.status.is_held() {
            return Err(QueueError::InvalidTransition {
                id: job.id,
                from: job.status,
                to: JobStatus::Queued,
            });
        }

        match self.release_inner(job_id, None, reason, Utc::now())? {
            Some(status) => Ok(status),
            None => {
                let current = self.get(job_id)?;
                Err(QueueError::InvalidTransition {
                    id: current.id,
                    from: current.status,
                    to: JobStatus::Queued,
                })
            }
        }
    }

    /// Releases a job only while `holder` still holds it. Used when a worker
    /// is declared dead; `None` means someone else already moved the job.
    pub fn release_held(
        &self,
        job_id: &str,
        holder: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<JobStatus>, QueueError> {
        self.release_inner(job_id, Some(holder), reason, now)
    }

    fn release_inner(
        &self,
        job_id: &str,
        holder: Option<&str>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<JobStatus>, QueueError> {
        let status = job_repo::release(
            &self.db,
            job_id,
            holder,
            reason,
            self.config.max_release_count,
            now,
        )?;

        match status {
            Some(JobStatus::Stalled) => {
                log::warn!("Job {} stalled after repeated releases: {}", job_id, reason);
                self.progress.emit(
                    JobEvent::new(job_id, JobEventKind::Stalled, "released too many times")
                        .with_error(reason),
                );
            }
            Some(_) => {
                log::info!("Job {} released back to queue: {}", job_id, reason);
                self.progress
                    .emit(JobEvent::new(job_id, JobEventKind::Released, reason));
            }
            None => {}
        }

        Ok(status)
    }

    pub fn get(&self, job_id: &str) -> Result<Job, QueueError> {
        job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?
            .into_job()
            .map_err(QueueError::from)
    }

    /// Lists jobs newest first, returning (jobs, total matching).
    pub fn list(&self, filter: &JobFilter) -> Result<(Vec<Job>, u64), QueueError> {
        let (rows, total) = job_repo::query(&self.db, filter)?;
        let jobs = rows
            .into_iter()
            .map(JobRow::into_job)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((jobs, total))
    }

    pub fn counts(&self) -> Result<QueueCounts, QueueError> {
        let mut counts = QueueCounts::default();
        for (status, n) in job_repo::count_by_status(&self.db)? {
            match JobStatus::parse(&status) {
                Some(status) => counts.set(status, n),
                None => log::warn!("Ignoring {} jobs with unknown status '{}'", n, status),
            }
        }
        Ok(counts)
    }
}
