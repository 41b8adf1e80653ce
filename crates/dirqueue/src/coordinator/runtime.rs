//! A worker process: heartbeat thread plus claim/process loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::error::{CoordinatorError, ProcessError, QueueError};
use crate::model::WorkerStatus;
use crate::processor::{ProcessOutcome, SubmissionProcessor};

use super::workers::WorkerCoordinator;

/// Timing knobs for a [`WorkerRuntime`].
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    pub heartbeat_interval: Duration,
    /// How long to wait before asking again when no job was available.
    pub poll_interval: Duration,
}

impl From<&crate::config::WorkerConfig> for RuntimeOptions {
    fn from(config: &crate::config::WorkerConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Job currently held by this worker. Heartbeats and assignment changes
/// go through this lock so a heartbeat never reports a stale status.
type Assignment = Arc<Mutex<Option<String>>>;

fn lock(assignment: &Assignment) -> MutexGuard<'_, Option<String>> {
    assignment.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct WorkerRuntime {
    worker_id: String,
    coordinator: WorkerCoordinator,
    shutdown: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerRuntime {
    /// Registers the worker and starts its threads.
    pub fn start(
        worker_id: impl Into<String>,
        coordinator: WorkerCoordinator,
        processor: Arc<SubmissionProcessor>,
        options: RuntimeOptions,
    ) -> Result<Self, CoordinatorError> {
        let worker_id = worker_id.into();
        coordinator.heartbeat(&worker_id, WorkerStatus::Idle)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let assignment: Assignment = Arc::new(Mutex::new(None));
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let mut runtime = Self {
            worker_id: worker_id.clone(),
            coordinator: coordinator.clone(),
            shutdown: Arc::clone(&shutdown),
            stop_tx: Some(stop_tx),
            threads: Vec::with_capacity(2),
        };

        let heartbeat = {
            let worker_id = worker_id.clone();
            let coordinator = coordinator.clone();
            let assignment = Arc::clone(&assignment);
            let stop_rx = stop_rx.clone();
            thread::Builder::new()
                .name(format!("{}-heartbeat", worker_id))
                .spawn(move || {
                    run_heartbeat(
                        &worker_id,
                        &coordinator,
                        &assignment,
                        &stop_rx,
                        options.heartbeat_interval,
                    )
                })
                .map_err(|e| CoordinatorError::SpawnFailed(e.to_string()))?
        };
        runtime.threads.push(heartbeat);

        let worker = {
            let worker_id = worker_id.clone();
            thread::Builder::new()
                .name(worker_id.clone())
                .spawn(move || {
                    run_worker(
                        &worker_id,
                        &coordinator,
                        &processor,
                        &assignment,
                        &shutdown,
                        &stop_rx,
                        options.poll_interval,
                    )
                })
                .map_err(|e| CoordinatorError::SpawnFailed(e.to_string()))?
        };
        runtime.threads.push(worker);

        info!("Worker {} started", worker_id);
        Ok(runtime)
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Graceful shutdown: an in-flight job is handed back at its next
    /// directory boundary, then the worker signs off.
    pub fn shutdown(mut self) -> Result<(), CoordinatorError> {
        self.stop_threads();
        self.coordinator.sign_off(&self.worker_id)?;
        info!("Worker {} stopped", self.worker_id);
        Ok(())
    }

    fn stop_threads(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Dropping the sender wakes both threads out of recv_timeout.
        self.stop_tx.take();
        for handle in self.threads.drain(..) {
            if let Err(e) = handle.join() {
                error!("Worker {} thread panicked: {:?}", self.worker_id, e);
            }
        }
    }
}

impl Drop for WorkerRuntime {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.stop_threads();
        }
    }
}

/// Returns `true` if the stop channel fired (or closed) before `timeout`.
fn stop_requested(stop_rx: &Receiver<()>, timeout: Duration) -> bool {
    !matches!(stop_rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
}

fn run_heartbeat(
    worker_id: &str,
    coordinator: &WorkerCoordinator,
    assignment: &Assignment,
    stop_rx: &Receiver<()>,
    interval: Duration,
) {
    let mut stop_seen = false;
    loop {
        let result = {
            let current = lock(assignment);
            let status = if current.is_some() {
                WorkerStatus::Processing
            } else {
                WorkerStatus::Idle
            };
            coordinator.heartbeat(worker_id, status)
        };

        match result {
            Ok(ack) => {
                if ack.control.emergency_stop && !stop_seen {
                    warn!(
                        "Worker {} observed emergency stop (version {})",
                        worker_id, ack.control.version
                    );
                }
                stop_seen = ack.control.emergency_stop;
            }
            Err(e) => error!("Heartbeat for {} failed: {}", worker_id, e),
        }

        if stop_requested(stop_rx, interval) {
            break;
        }
    }
    debug!("Heartbeat thread for {} stopped", worker_id);
}

fn run_worker(
    worker_id: &str,
    coordinator: &WorkerCoordinator,
    processor: &SubmissionProcessor,
    assignment: &Assignment,
    shutdown: &AtomicBool,
    stop_rx: &Receiver<()>,
    poll_interval: Duration,
) {
    while !shutdown.load(Ordering::Relaxed) {
        let claimed = {
            let mut current = lock(assignment);
            match coordinator.claim(worker_id) {
                Ok(Some(claimed)) => {
                    *current = Some(claimed.job.id.clone());
                    Some(claimed)
                }
                Ok(None) => None,
                Err(CoordinatorError::Queue(QueueError::EmergencyStopActive)) => {
                    debug!("Worker {} idle: emergency stop active", worker_id);
                    None
                }
                Err(e) => {
                    error!("Worker {} failed to claim: {}", worker_id, e);
                    None
                }
            }
        };

        let Some(claimed) = claimed else {
            if stop_requested(stop_rx, poll_interval) {
                break;
            }
            continue;
        };

        let job_id = claimed.job.id.clone();
        match processor.process_with_cancel(&claimed.job, worker_id, shutdown) {
            Ok(ProcessOutcome::Finished { status, .. }) => {
                info!("Worker {} finished job {} ({})", worker_id, job_id, status)
            }
            Ok(ProcessOutcome::Aborted) => {
                warn!("Worker {} aborted job {}", worker_id, job_id)
            }
            Ok(ProcessOutcome::Released) => {
                info!("Worker {} handed job {} back", worker_id, job_id)
            }
            Err(ProcessError::ClaimLost { .. }) => {
                warn!("Worker {} lost job {} mid-run", worker_id, job_id)
            }
            Err(e) => error!("Worker {} failed processing {}: {}", worker_id, job_id, e),
        }

        let mut current = lock(assignment);
        if let Err(e) = coordinator.finish(worker_id, &job_id) {
            error!("Worker {} failed to finish {}: {}", worker_id, job_id, e);
        }
        *current = None;
    }
    debug!("Worker loop for {} stopped", worker_id);
}
