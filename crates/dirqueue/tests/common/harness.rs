//! Test harness for isolated queue execution.
//!
//! Each harness owns a temporary directory holding its database, so tests
//! never share state.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use dirqueue::catalog::StaticCatalog;
use dirqueue::config::Config;
use dirqueue::db::Database;
use dirqueue::model::Job;
use dirqueue::processor::SubmissionProcessor;
use dirqueue::queue::EnqueueRequest;
use dirqueue::DirQueue;

use super::executor::ScriptedExecutor;

pub struct TestHarness {
    _temp_dir: TempDir,
    pub app: DirQueue,
    pub executor: Arc<ScriptedExecutor>,
}

impl TestHarness {
    pub fn new(catalog: StaticCatalog, config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("queue.db")).expect("Failed to open database");
        let app = DirQueue::with_parts(config, db, Arc::new(catalog));
        Self {
            _temp_dir: temp_dir,
            app,
            executor: Arc::new(ScriptedExecutor::new()),
        }
    }

    pub fn processor(&self) -> SubmissionProcessor {
        self.app.processor(self.executor.clone())
    }

    pub fn enqueue(&self, customer: &str, tier: &str, directories: &[&str]) -> Job {
        self.app
            .queue()
            .enqueue(&EnqueueRequest::new(
                customer,
                tier,
                directories.iter().map(|s| s.to_string()).collect(),
            ))
            .expect("enqueue failed")
    }

    /// Claims the next job for `worker_id` through the coordinator.
    pub fn claim(&self, worker_id: &str) -> Job {
        self.app
            .coordinator()
            .claim(worker_id)
            .expect("claim failed")
            .expect("nothing to claim")
            .job
    }
}
