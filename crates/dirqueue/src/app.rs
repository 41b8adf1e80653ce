//! Wires the queue, coordinator and read model together from a [`Config`].

use std::sync::Arc;

use crate::broadcast::{BroadcastProgress, JobEventBroadcaster, ProgressSink};
use crate::catalog::{DirectoryCatalog, StaticCatalog};
use crate::config::Config;
use crate::coordinator::{
    ControlPlane, LivenessMonitor, RuntimeOptions, WorkerCoordinator, WorkerRuntime,
};
use crate::db::Database;
use crate::error::{ConfigError, CoordinatorError, Result};
use crate::processor::{
    RetryPolicy, SubmissionExecutor, SubmissionLedger, SubmissionProcessor, TimedExecutor,
};
use crate::progress::ProgressReporter;
use crate::queue::QueueManager;

/// Process-wide handle on one queue database.
pub struct DirQueue {
    config: Config,
    queue: QueueManager,
    coordinator: WorkerCoordinator,
    reporter: ProgressReporter,
    events: JobEventBroadcaster,
}

impl DirQueue {
    /// Opens the configured database and catalog. Without a catalog file
    /// the catalog is empty and every enqueue is rejected.
    pub fn open(config: Config) -> Result<Self> {
        let path = config.resolved_database_path().ok_or_else(|| ConfigError::Validation {
            message: "no database_path configured and no home directory found".to_string(),
        })?;
        let db = Database::open(&path)?;

        let catalog: Arc<dyn DirectoryCatalog> = match &config.catalog_path {
            Some(path) => Arc::new(StaticCatalog::load(path)?),
            None => {
                log::warn!("No catalog_path configured; the directory catalog is empty");
                Arc::new(StaticCatalog::default())
            }
        };

        Ok(Self::with_parts(config, db, catalog))
    }

    /// Builds from an already-open database and catalog.
    pub fn with_parts(config: Config, db: Database, catalog: Arc<dyn DirectoryCatalog>) -> Self {
        let events = JobEventBroadcaster::default();
        let sink: Arc<dyn ProgressSink> = Arc::new(BroadcastProgress::new(events.clone()));

        let queue = QueueManager::new(db, catalog, config.queue.clone()).with_progress(sink);
        let coordinator = WorkerCoordinator::new(queue.clone(), config.worker.liveness_window());
        let reporter = ProgressReporter::new(queue.clone(), config.progress.eta_window);

        Self {
            config,
            queue,
            coordinator,
            reporter,
            events,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn coordinator(&self) -> &WorkerCoordinator {
        &self.coordinator
    }

    pub fn control(&self) -> &ControlPlane {
        self.coordinator.control()
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    pub fn ledger(&self) -> SubmissionLedger {
        SubmissionLedger::new(self.queue.database().clone())
    }

    /// Live job events; lagging subscribers miss events, nothing blocks.
    pub fn events(&self) -> &JobEventBroadcaster {
        &self.events
    }

    /// A processor driving `executor` with the configured retry and timing.
    pub fn processor(&self, executor: Arc<dyn SubmissionExecutor>) -> SubmissionProcessor {
        let worker = &self.config.worker;
        SubmissionProcessor::new(
            self.queue.clone(),
            TimedExecutor::new(executor, worker.attempt_timeout()),
            RetryPolicy::from(&self.config.retry),
            worker.rate_limit_delay(),
        )
        .with_progress(Arc::new(BroadcastProgress::new(self.events.clone())))
    }

    pub fn start_worker(
        &self,
        worker_id: &str,
        executor: Arc<dyn SubmissionExecutor>,
    ) -> std::result::Result<WorkerRuntime, CoordinatorError> {
        WorkerRuntime::start(
            worker_id,
            self.coordinator.clone(),
            Arc::new(self.processor(executor)),
            RuntimeOptions::from(&self.config.worker),
        )
    }

    /// Sweeps for dead workers once per heartbeat interval.
    pub fn start_liveness_monitor(&self) -> std::result::Result<LivenessMonitor, CoordinatorError> {
        LivenessMonitor::start(
            self.coordinator.clone(),
            self.config.worker.heartbeat_interval(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::JobEventKind;
    use crate::queue::EnqueueRequest;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_database_and_loads_catalog() {
        let dir = TempDir::new().unwrap();
        let catalog_path = dir.path().join("directories.json");
        std::fs::write(
            &catalog_path,
            r#"[{"id": "yelp", "name": "Yelp", "submissionUrl": "https://biz.yelp.com"}]"#,
        )
        .unwrap();

        let config = Config {
            database_path: Some(dir.path().join("data").join("queue.db")),
            catalog_path: Some(catalog_path),
            ..Config::default()
        };
        let app = DirQueue::open(config).unwrap();
        let mut events = app.events().subscribe();

        let job = app
            .queue()
            .enqueue(&EnqueueRequest::new("cust", "growth", vec!["yelp".to_string()]))
            .unwrap();
        assert!(dir.path().join("data").join("queue.db").exists());
        assert_eq!(events.try_recv().unwrap().kind, JobEventKind::Enqueued);
        assert_eq!(app.reporter().progress(&job.id).unwrap().percentage, 0.0);
    }

    #[test]
    fn test_missing_catalog_file_fails() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            database_path: Some(dir.path().join("queue.db")),
            catalog_path: Some(dir.path().join("nope.json")),
            ..Config::default()
        };
        assert!(matches!(
            DirQueue::open(config),
            Err(crate::error::DirQueueError::Catalog(_))
        ));
    }
}
