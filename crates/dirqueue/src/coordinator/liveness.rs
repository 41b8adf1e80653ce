//! Background reaper for workers that stopped heartbeating.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::error::CoordinatorError;

use super::workers::WorkerCoordinator;

/// Runs [`WorkerCoordinator::reap_expired`] on a fixed interval until
/// stopped. Any number of monitors may run; each expiry is handled once.
pub struct LivenessMonitor {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LivenessMonitor {
    pub fn start(
        coordinator: WorkerCoordinator,
        interval: Duration,
    ) -> Result<Self, CoordinatorError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("liveness-monitor".to_string())
            .spawn(move || {
                log::debug!("Liveness monitor started (every {:?})", interval);
                loop {
                    match coordinator.reap_expired(Utc::now()) {
                        Ok(report) if !report.is_empty() => log::info!(
                            "Reaped {} worker(s), released {} job(s)",
                            report.offline_workers.len(),
                            report.released_jobs.len()
                        ),
                        Ok(_) => {}
                        Err(e) => log::error!("Liveness sweep failed: {}", e),
                    }

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
                log::debug!("Liveness monitor stopped");
            })
            .map_err(|e| CoordinatorError::SpawnFailed(e.to_string()))?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stops the sweep loop and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the sleeping thread.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Liveness monitor thread panicked");
            }
        }
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::config::QueueConfig;
    use crate::db::Database;
    use crate::model::WorkerStatus;
    use crate::queue::QueueManager;
    use std::sync::Arc;

    #[test]
    fn test_monitor_reaps_and_stops() {
        let queue = QueueManager::new(
            Database::open_in_memory().unwrap(),
            Arc::new(StaticCatalog::default()),
            QueueConfig::default(),
        );
        let coordinator = WorkerCoordinator::new(queue, Duration::from_millis(50));
        coordinator
            .heartbeat_at(
                "ghost",
                WorkerStatus::Idle,
                Utc::now() - chrono::Duration::seconds(10),
            )
            .unwrap();

        let monitor = LivenessMonitor::start(coordinator.clone(), Duration::from_millis(20)).unwrap();
        thread::sleep(Duration::from_millis(100));
        monitor.stop();

        let ghost = coordinator.worker("ghost").unwrap().unwrap();
        assert_eq!(ghost.status, WorkerStatus::Offline);
    }
}
