//! Drives one claimed job through its directories.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::info_span;

use crate::broadcast::{JobEvent, JobEventKind, NoopProgress, ProgressSink};
use crate::catalog::{Difficulty, DirectoryCatalog};
use crate::db::entry_repo::{self, NewEntry};
use crate::db::{control_repo, job_repo, Database};
use crate::error::ProcessError;
use crate::model::{EntryStatus, Job, JobStatus};
use crate::queue::QueueManager;

use super::backoff::RetryPolicy;
use super::executor::{AttemptResult, FailureKind, SubmissionRequest, TimedExecutor};
use super::ledger::SubmissionLedger;

/// Error summary written when an emergency stop aborts a job.
pub const ABORT_SUMMARY: &str = "aborted: emergency stop";

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// How a processing run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Every entry reached a terminal state and the job was rolled up.
    Finished {
        status: JobStatus,
        error_summary: Option<String>,
    },
    /// An emergency stop was observed; remaining entries were skipped.
    Aborted,
    /// The worker was asked to stop and handed the job back to the queue.
    Released,
}

/// How a wait before the next attempt ended.
#[derive(Debug, PartialEq, Eq)]
enum Wait {
    Elapsed,
    Cancelled,
    EmergencyStop,
}

#[derive(Debug)]
struct PendingAttempt {
    directory_id: String,
    not_before: Instant,
}

pub struct SubmissionProcessor {
    db: Database,
    catalog: Arc<dyn DirectoryCatalog>,
    queue: QueueManager,
    ledger: SubmissionLedger,
    executor: TimedExecutor,
    retry: RetryPolicy,
    rate_limit_delay: Duration,
    progress: Arc<dyn ProgressSink>,
}

impl SubmissionProcessor {
    pub fn new(
        queue: QueueManager,
        executor: TimedExecutor,
        retry: RetryPolicy,
        rate_limit_delay: Duration,
    ) -> Self {
        let db = queue.database().clone();
        Self {
            catalog: Arc::clone(queue.catalog()),
            ledger: SubmissionLedger::new(db.clone()),
            db,
            queue,
            executor,
            retry,
            rate_limit_delay,
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn ledger(&self) -> &SubmissionLedger {
        &self.ledger
    }

    /// Processes a job claimed by `worker_id` until it is terminal.
    pub fn process(&self, job: &Job, worker_id: &str) -> Result<ProcessOutcome, ProcessError> {
        self.process_with_cancel(job, worker_id, &AtomicBool::new(false))
    }

    /// Like [`process`](Self::process), but hands the job back to the queue
    /// at the next directory boundary once `cancel` is set.
    pub fn process_with_cancel(
        &self,
        job: &Job,
        worker_id: &str,
        cancel: &AtomicBool,
    ) -> Result<ProcessOutcome, ProcessError> {
        let _job_span = info_span!(
            "job",
            job_id = %job.id,
            worker = %worker_id,
            tier = %job.package_tier
        )
        .entered();

        self.step_start(job, worker_id)?;

        let mut work = self.pending_work(job)?;
        let mut last_attempt: Option<Instant> = None;

        while let Some(item) = take_next(&mut work) {
            let now = Instant::now();
            let backoff_wait = item.not_before.saturating_duration_since(now);
            let rate_wait = last_attempt
                .map(|t| (t + self.rate_limit_delay).saturating_duration_since(now))
                .unwrap_or(Duration::ZERO);

            match self.wait(backoff_wait.max(rate_wait), cancel)? {
                Wait::Cancelled => return self.step_release_for_shutdown(job, worker_id),
                Wait::EmergencyStop => return self.step_abort(job, worker_id),
                Wait::Elapsed => {}
            }
            if cancel.load(Ordering::Relaxed) {
                return self.step_release_for_shutdown(job, worker_id);
            }

            // Directory boundary: no attempt starts while the stop is active.
            if control_repo::read(&self.db)?.emergency_stop {
                return self.step_abort(job, worker_id);
            }
            self.ensure_held(job, worker_id)?;

            last_attempt = Some(Instant::now());
            if let Some(delay) = self.step_attempt(job, worker_id, &item.directory_id)? {
                work.push(PendingAttempt {
                    directory_id: item.directory_id,
                    not_before: Instant::now() + delay,
                });
            }
        }

        self.step_finalize(job, worker_id)
    }

    /// Sleeps in short slices, watching `cancel` and the emergency stop.
    fn wait(&self, duration: Duration, cancel: &AtomicBool) -> Result<Wait, ProcessError> {
        let deadline = Instant::now() + duration;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Ok(Wait::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Wait::Elapsed);
            }
            if control_repo::read(&self.db)?.emergency_stop {
                return Ok(Wait::EmergencyStop);
            }
            thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }

    fn ensure_held(&self, job: &Job, worker_id: &str) -> Result<(), ProcessError> {
        if job_repo::is_held_by(&self.db, &job.id, worker_id)? {
            return Ok(());
        }
        log::warn!(
            "Worker {} no longer holds job {}; stopping without further writes",
            worker_id,
            job.id
        );
        Err(ProcessError::ClaimLost {
            job_id: job.id.clone(),
            worker_id: worker_id.to_string(),
        })
    }

    /// `claimed -> processing` and ledger materialization.
    fn step_start(&self, job: &Job, worker_id: &str) -> Result<(), ProcessError> {
        let now = Utc::now();
        if !job_repo::mark_processing(&self.db, &job.id, worker_id, now)? {
            let current = job_repo::find_by_id(&self.db, &job.id)?
                .ok_or_else(|| ProcessError::JobNotFound(job.id.clone()))?
                .into_job()?;
            let resumable = current.status == JobStatus::Processing
                && current.claimed_by.as_deref() == Some(worker_id);
            if !resumable {
                return Err(ProcessError::NotClaimed {
                    job_id: job.id.clone(),
                    worker_id: worker_id.to_string(),
                });
            }
            log::info!("Worker {} resuming job {}", worker_id, job.id);
        }

        // Easy directories first, allocation order within a difficulty.
        let mut planned: Vec<(Difficulty, usize, &String)> = job
            .directory_ids
            .iter()
            .enumerate()
            .map(|(index, id)| {
                let difficulty = self
                    .catalog
                    .get(id)
                    .map(|d| d.effective_difficulty())
                    .unwrap_or(Difficulty::Medium);
                (difficulty, index, id)
            })
            .collect();
        planned.sort_by_key(|(difficulty, index, _)| (*difficulty, *index));

        let entries: Vec<NewEntry> = planned
            .into_iter()
            .enumerate()
            .map(|(position, (difficulty, _, id))| NewEntry {
                directory_id: id.clone(),
                position: position as u32,
                max_attempts: self.retry.max_attempts(difficulty),
            })
            .collect();
        let created = entry_repo::materialize(&self.db, &job.id, &entries, now)?;

        log::info!(
            "Processing job {} ({} directories, {} new ledger entries)",
            job.id,
            entries.len(),
            created
        );
        self.progress.emit(
            JobEvent::new(&job.id, JobEventKind::Started, "processing started")
                .with_worker(worker_id),
        );
        Ok(())
    }

    fn pending_work(&self, job: &Job) -> Result<Vec<PendingAttempt>, ProcessError> {
        let now = Instant::now();
        Ok(self
            .ledger
            .entries(&job.id)?
            .into_iter()
            .filter(|entry| !entry.is_terminal())
            .map(|entry| PendingAttempt {
                directory_id: entry.directory_id,
                not_before: now,
            })
            .collect())
    }

    /// Runs one attempt. Returns the backoff delay when the entry should be
    /// retried.
    fn step_attempt(
        &self,
        job: &Job,
        worker_id: &str,
        directory_id: &str,
    ) -> Result<Option<Duration>, ProcessError> {
        let entry = self.ledger.entry(&job.id, directory_id)?;
        if entry.is_terminal() {
            return Ok(None);
        }
        let attempt = entry.attempt_count + 1;
        let _attempt_span = info_span!("attempt", directory = %directory_id, attempt).entered();

        entry_repo::mark_in_progress(&self.db, &job.id, directory_id, Utc::now())?;
        self.progress.emit(
            JobEvent::new(&job.id, JobEventKind::EntryStarted, "submitting")
                .with_worker(worker_id)
                .with_directory(directory_id, attempt),
        );

        let result = match self.catalog.get(directory_id) {
            Some(directory) => self.executor.submit(&SubmissionRequest {
                job_id: job.id.clone(),
                customer_id: job.customer_id.clone(),
                directory,
                attempt,
            }),
            None => AttemptResult::failure(
                FailureKind::SchemaMismatch,
                "directory is no longer in the catalog",
            ),
        };

        // The attempt may have outlived our claim.
        self.ensure_held(job, worker_id)?;
        let update = self
            .ledger
            .report_outcome(&job.id, directory_id, result.into())?;
        let entry = update.entry;
        let error = entry.last_error.clone().unwrap_or_default();

        match entry.status {
            EntryStatus::Succeeded => {
                log::info!("Submitted job {} to {}", job.id, directory_id);
                self.progress.emit(
                    JobEvent::new(&job.id, JobEventKind::EntrySucceeded, "submitted")
                        .with_directory(directory_id, entry.attempt_count),
                );
                Ok(None)
            }
            EntryStatus::Failed => {
                log::warn!(
                    "Submission of job {} to {} failed after {} attempt(s): {}",
                    job.id,
                    directory_id,
                    entry.attempt_count,
                    error
                );
                self.progress.emit(
                    JobEvent::new(&job.id, JobEventKind::EntryFailed, "submission failed")
                        .with_directory(directory_id, entry.attempt_count)
                        .with_error(&error),
                );
                Ok(None)
            }
            EntryStatus::Pending => {
                let delay = self.retry.delay(entry.attempt_count);
                log::info!(
                    "Retrying job {} on {} in {:?} (attempt {}/{}): {}",
                    job.id,
                    directory_id,
                    delay,
                    entry.attempt_count + 1,
                    entry.max_attempts,
                    error
                );
                self.progress.emit(
                    JobEvent::new(
                        &job.id,
                        JobEventKind::EntryRetrying,
                        format!("retrying in {}ms", delay.as_millis()),
                    )
                    .with_directory(directory_id, entry.attempt_count)
                    .with_error(&error),
                );
                Ok(Some(delay))
            }
            EntryStatus::InProgress | EntryStatus::Skipped => Ok(None),
        }
    }

    fn step_abort(&self, job: &Job, worker_id: &str) -> Result<ProcessOutcome, ProcessError> {
        self.ensure_held(job, worker_id)?;
        let now = Utc::now();
        let skipped = entry_repo::skip_remaining(&self.db, &job.id, ABORT_SUMMARY, now)?;
        if !job_repo::finish(
            &self.db,
            &job.id,
            worker_id,
            JobStatus::Failed,
            Some(ABORT_SUMMARY),
            now,
        )? {
            return Err(ProcessError::ClaimLost {
                job_id: job.id.clone(),
                worker_id: worker_id.to_string(),
            });
        }

        log::warn!(
            "Emergency stop: job {} aborted, {} directories skipped",
            job.id,
            skipped
        );
        self.progress.emit(JobEvent::new(
            &job.id,
            JobEventKind::EntriesSkipped,
            format!("{} directories skipped", skipped),
        ));
        self.progress.emit(
            JobEvent::new(&job.id, JobEventKind::Failed, ABORT_SUMMARY).with_worker(worker_id),
        );
        Ok(ProcessOutcome::Aborted)
    }

    fn step_release_for_shutdown(
        &self,
        job: &Job,
        worker_id: &str,
    ) -> Result<ProcessOutcome, ProcessError> {
        match self
            .queue
            .release_held(&job.id, worker_id, "worker shutting down", Utc::now())?
        {
            Some(_) => Ok(ProcessOutcome::Released),
            None => Err(ProcessError::ClaimLost {
                job_id: job.id.clone(),
                worker_id: worker_id.to_string(),
            }),
        }
    }

    fn step_finalize(&self, job: &Job, worker_id: &str) -> Result<ProcessOutcome, ProcessError> {
        self.ensure_held(job, worker_id)?;

        let entries = self.ledger.entries(&job.id)?;
        let failed: Vec<String> = entries
            .iter()
            .filter(|e| e.status == EntryStatus::Failed)
            .map(|e| e.directory_id.clone())
            .collect();
        let succeeded = entries
            .iter()
            .filter(|e| e.status == EntryStatus::Succeeded)
            .count();
        let (status, error_summary) = roll_up(entries.len(), succeeded, &failed);

        if !job_repo::finish(
            &self.db,
            &job.id,
            worker_id,
            status,
            error_summary.as_deref(),
            Utc::now(),
        )? {
            return Err(ProcessError::ClaimLost {
                job_id: job.id.clone(),
                worker_id: worker_id.to_string(),
            });
        }

        let kind = if status == JobStatus::Completed {
            JobEventKind::Completed
        } else {
            JobEventKind::Failed
        };
        let message = format!(
            "{} of {} directories submitted",
            succeeded,
            entries.len()
        );
        log::info!("Job {} {}: {}", job.id, status, message);
        let mut event = JobEvent::new(&job.id, kind, message).with_worker(worker_id);
        if let Some(summary) = &error_summary {
            event = event.with_error(summary);
        }
        self.progress.emit(event);

        Ok(ProcessOutcome::Finished {
            status,
            error_summary,
        })
    }
}

/// Job-level result from per-directory results. Partial failure still
/// completes the job.
fn roll_up(total: usize, succeeded: usize, failed: &[String]) -> (JobStatus, Option<String>) {
    if failed.is_empty() {
        (JobStatus::Completed, None)
    } else if succeeded == 0 {
        (
            JobStatus::Failed,
            Some(format!(
                "all {} directories failed: {}",
                failed.len(),
                failed.join(", ")
            )),
        )
    } else {
        (
            JobStatus::Completed,
            Some(format!(
                "{} of {} directories failed: {}",
                failed.len(),
                total,
                failed.join(", ")
            )),
        )
    }
}

/// First attempt that is already due, else the one due soonest.
fn take_next(work: &mut Vec<PendingAttempt>) -> Option<PendingAttempt> {
    if work.is_empty() {
        return None;
    }
    let now = Instant::now();
    let index = work
        .iter()
        .position(|p| p.not_before <= now)
        .or_else(|| {
            work.iter()
                .enumerate()
                .min_by_key(|(_, p)| p.not_before)
                .map(|(i, _)| i)
        })
        .unwrap_or(0);
    Some(work.remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Directory, StaticCatalog};
    use crate::config::{MaxAttemptsConfig, QueueConfig};
    use crate::processor::executor::SubmissionExecutor;
    use crate::queue::EnqueueRequest;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Replays scripted results per directory; succeeds once a script runs out.
    #[derive(Default)]
    struct Scripted {
        scripts: Mutex<HashMap<String, VecDeque<AttemptResult>>>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn script(self, directory_id: &str, results: Vec<AttemptResult>) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(directory_id.to_string(), results.into());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SubmissionExecutor for Scripted {
        fn submit(&self, request: &SubmissionRequest) -> AttemptResult {
            self.calls.lock().unwrap().push(request.directory.id.clone());
            self.scripts
                .lock()
                .unwrap()
                .get_mut(&request.directory.id)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| {
                    AttemptResult::success(Some(&format!(
                        "https://{}.example/listing",
                        request.directory.id
                    )))
                })
        }
    }

    fn directory(id: &str, difficulty: Difficulty) -> Directory {
        Directory {
            id: id.to_string(),
            name: id.to_uppercase(),
            submission_url: format!("https://{}.example", id),
            difficulty: Some(difficulty),
            domain_authority: None,
            required_fields: vec![],
        }
    }

    fn setup(executor: Arc<Scripted>) -> (QueueManager, SubmissionProcessor) {
        setup_with_retry(
            executor,
            RetryPolicy::new(Duration::ZERO, Duration::ZERO, MaxAttemptsConfig::default()),
        )
    }

    fn setup_with_retry(
        executor: Arc<Scripted>,
        retry: RetryPolicy,
    ) -> (QueueManager, SubmissionProcessor) {
        let catalog = StaticCatalog::new(vec![
            directory("hard-1", Difficulty::Hard),
            directory("easy-1", Difficulty::Easy),
            directory("med-1", Difficulty::Medium),
            directory("easy-2", Difficulty::Easy),
        ])
        .unwrap();
        let queue = QueueManager::new(
            Database::open_in_memory().unwrap(),
            Arc::new(catalog),
            QueueConfig::default(),
        );
        let processor = SubmissionProcessor::new(
            queue.clone(),
            TimedExecutor::new(executor, Duration::from_secs(5)),
            retry,
            Duration::ZERO,
        );
        (queue, processor)
    }

    fn all_ids() -> Vec<String> {
        ["hard-1", "easy-1", "med-1", "easy-2"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_roll_up() {
        assert_eq!(roll_up(3, 3, &[]), (JobStatus::Completed, None));

        let (status, summary) = roll_up(5, 3, &["a".to_string(), "b".to_string()]);
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(summary.as_deref(), Some("2 of 5 directories failed: a, b"));

        let (status, summary) = roll_up(2, 0, &["a".to_string(), "b".to_string()]);
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(summary.as_deref(), Some("all 2 directories failed: a, b"));
    }

    #[test]
    fn test_take_next_prefers_due_items() {
        let now = Instant::now();
        let mut work = vec![
            PendingAttempt {
                directory_id: "later".to_string(),
                not_before: now + Duration::from_secs(60),
            },
            PendingAttempt {
                directory_id: "due".to_string(),
                not_before: now,
            },
        ];
        assert_eq!(take_next(&mut work).unwrap().directory_id, "due");
        assert_eq!(take_next(&mut work).unwrap().directory_id, "later");
        assert!(take_next(&mut work).is_none());
    }

    #[test]
    fn test_wait_is_cancellable() {
        let (queue, processor) = setup(Arc::new(Scripted::default()));
        let started = Instant::now();
        assert_eq!(
            processor
                .wait(Duration::from_secs(10), &AtomicBool::new(true))
                .unwrap(),
            Wait::Cancelled
        );
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(
            processor.wait(Duration::ZERO, &AtomicBool::new(false)).unwrap(),
            Wait::Elapsed
        );

        control_repo::set_emergency_stop(queue.database(), true, None, Utc::now()).unwrap();
        assert_eq!(
            processor
                .wait(Duration::from_secs(10), &AtomicBool::new(false))
                .unwrap(),
            Wait::EmergencyStop
        );
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_emergency_stop_interrupts_backoff() {
        let executor = Arc::new(Scripted::default().script(
            "easy-1",
            vec![AttemptResult::failure(FailureKind::Network, "reset")],
        ));
        let (queue, processor) = setup_with_retry(
            Arc::clone(&executor),
            RetryPolicy::new(
                Duration::from_secs(60),
                Duration::from_secs(60),
                MaxAttemptsConfig::default(),
            ),
        );
        queue
            .enqueue(&EnqueueRequest::new("cust", "starter", vec!["easy-1".to_string()]))
            .unwrap();
        let job = queue.claim_next("w1").unwrap().unwrap();

        let db = queue.database().clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            control_repo::set_emergency_stop(&db, true, None, Utc::now()).unwrap();
        });

        let started = Instant::now();
        assert_eq!(processor.process(&job, "w1").unwrap(), ProcessOutcome::Aborted);
        assert!(started.elapsed() < Duration::from_secs(10));
        stopper.join().unwrap();

        assert_eq!(executor.calls(), vec!["easy-1"]);
        let entry = processor.ledger().entry(&job.id, "easy-1").unwrap();
        assert_eq!(entry.status, EntryStatus::Skipped);
        assert_eq!(entry.attempt_count, 1);
    }

    #[test]
    fn test_processes_easy_directories_first() {
        let executor = Arc::new(Scripted::default());
        let (queue, processor) = setup(Arc::clone(&executor));
        queue
            .enqueue(&EnqueueRequest::new("cust", "starter", all_ids()))
            .unwrap();
        let job = queue.claim_next("w1").unwrap().unwrap();

        let outcome = processor.process(&job, "w1").unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::Finished {
                status: JobStatus::Completed,
                error_summary: None
            }
        );
        assert_eq!(executor.calls(), vec!["easy-1", "easy-2", "med-1", "hard-1"]);

        let entries = processor.ledger().entries(&job.id).unwrap();
        assert!(entries.iter().all(|e| e.status == EntryStatus::Succeeded));
        assert_eq!(entries[3].max_attempts, 4);
        assert_eq!(
            entries[0].result_url.as_deref(),
            Some("https://easy-1.example/listing")
        );
    }

    #[test]
    fn test_retry_is_requeued_behind_other_work() {
        let executor = Arc::new(Scripted::default().script(
            "easy-1",
            vec![AttemptResult::failure(FailureKind::Network, "reset")],
        ));
        let (queue, processor) = setup(Arc::clone(&executor));
        queue
            .enqueue(&EnqueueRequest::new(
                "cust",
                "starter",
                vec!["easy-1".to_string(), "easy-2".to_string()],
            ))
            .unwrap();
        let job = queue.claim_next("w1").unwrap().unwrap();

        processor.process(&job, "w1").unwrap();
        assert_eq!(executor.calls(), vec!["easy-1", "easy-2", "easy-1"]);
        let entry = processor.ledger().entry(&job.id, "easy-1").unwrap();
        assert_eq!(entry.status, EntryStatus::Succeeded);
        assert_eq!(entry.attempt_count, 2);
    }

    #[test]
    fn test_all_failed_marks_job_failed() {
        let rejected = || vec![AttemptResult::failure(FailureKind::Rejected, "duplicate listing")];
        let executor = Arc::new(
            Scripted::default()
                .script("easy-1", rejected())
                .script("easy-2", rejected()),
        );
        let (queue, processor) = setup(executor);
        queue
            .enqueue(&EnqueueRequest::new(
                "cust",
                "starter",
                vec!["easy-1".to_string(), "easy-2".to_string()],
            ))
            .unwrap();
        let job = queue.claim_next("w1").unwrap().unwrap();

        match processor.process(&job, "w1").unwrap() {
            ProcessOutcome::Finished {
                status,
                error_summary,
            } => {
                assert_eq!(status, JobStatus::Failed);
                assert!(error_summary.unwrap().contains("easy-1, easy-2"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(queue.get(&job.id).unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn test_unclaimed_job_is_rejected() {
        let (queue, processor) = setup(Arc::new(Scripted::default()));
        let job = queue
            .enqueue(&EnqueueRequest::new("cust", "starter", all_ids()))
            .unwrap();
        assert!(matches!(
            processor.process(&job, "w1"),
            Err(ProcessError::NotClaimed { .. })
        ));
        queue.claim_next("w1").unwrap();
        assert!(matches!(
            processor.process(&job, "w2"),
            Err(ProcessError::NotClaimed { .. })
        ));
    }

    #[test]
    fn test_emergency_stop_before_first_directory() {
        let executor = Arc::new(Scripted::default());
        let (queue, processor) = setup(Arc::clone(&executor));
        queue
            .enqueue(&EnqueueRequest::new("cust", "starter", all_ids()))
            .unwrap();
        let job = queue.claim_next("w1").unwrap().unwrap();
        control_repo::set_emergency_stop(queue.database(), true, None, Utc::now()).unwrap();

        assert_eq!(processor.process(&job, "w1").unwrap(), ProcessOutcome::Aborted);
        assert!(executor.calls().is_empty());

        let stored = queue.get(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error_summary.as_deref(), Some(ABORT_SUMMARY));
        let entries = processor.ledger().entries(&job.id).unwrap();
        assert!(entries.iter().all(|e| e.status == EntryStatus::Skipped));
    }

    #[test]
    fn test_cancel_releases_job() {
        let (queue, processor) = setup(Arc::new(Scripted::default()));
        queue
            .enqueue(&EnqueueRequest::new("cust", "starter", all_ids()))
            .unwrap();
        let job = queue.claim_next("w1").unwrap().unwrap();

        let cancel = AtomicBool::new(true);
        assert_eq!(
            processor.process_with_cancel(&job, "w1", &cancel).unwrap(),
            ProcessOutcome::Released
        );
        let stored = queue.get(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.release_count, 1);
    }

    #[test]
    fn test_resume_after_crash_keeps_finished_entries() {
        let executor = Arc::new(Scripted::default());
        let (queue, processor) = setup(Arc::clone(&executor));
        let job = queue
            .enqueue(&EnqueueRequest::new(
                "cust",
                "starter",
                vec!["easy-1".to_string(), "easy-2".to_string()],
            ))
            .unwrap();

        // First holder finished easy-1 and died mid easy-2.
        let claimed = queue.claim_next("w1").unwrap().unwrap();
        let db = queue.database();
        job_repo::mark_processing(db, &job.id, "w1", Utc::now()).unwrap();
        let entries = vec![
            NewEntry {
                directory_id: "easy-1".to_string(),
                position: 0,
                max_attempts: 2,
            },
            NewEntry {
                directory_id: "easy-2".to_string(),
                position: 1,
                max_attempts: 2,
            },
        ];
        entry_repo::materialize(db, &job.id, &entries, Utc::now()).unwrap();
        entry_repo::record_success(db, &job.id, "easy-1", Some("https://first"), Utc::now())
            .unwrap();
        entry_repo::mark_in_progress(db, &job.id, "easy-2", Utc::now()).unwrap();
        queue.release_held(&claimed.id, "w1", "heartbeat expired", Utc::now()).unwrap();

        let reclaimed = queue.claim_next("w2").unwrap().unwrap();
        processor.process(&reclaimed, "w2").unwrap();

        assert_eq!(executor.calls(), vec!["easy-2"]);
        let first = processor.ledger().entry(&job.id, "easy-1").unwrap();
        assert_eq!(first.result_url.as_deref(), Some("https://first"));
        assert_eq!(queue.get(&job.id).unwrap().status, JobStatus::Completed);
    }
}
