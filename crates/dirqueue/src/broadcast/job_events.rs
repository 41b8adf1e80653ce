//! Job event broadcaster for live dashboards.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// What happened to a job or one of its entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Enqueued,
    Claimed,
    Started,
    EntryStarted,
    EntrySucceeded,
    EntryRetrying,
    EntryFailed,
    EntriesSkipped,
    Released,
    Completed,
    Failed,
    Stalled,
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobEventKind::Enqueued => write!(f, "Enqueued"),
            JobEventKind::Claimed => write!(f, "Claimed"),
            JobEventKind::Started => write!(f, "Started"),
            JobEventKind::EntryStarted => write!(f, "Submitting"),
            JobEventKind::EntrySucceeded => write!(f, "Submitted"),
            JobEventKind::EntryRetrying => write!(f, "Retrying"),
            JobEventKind::EntryFailed => write!(f, "Submission failed"),
            JobEventKind::EntriesSkipped => write!(f, "Skipped"),
            JobEventKind::Released => write!(f, "Released"),
            JobEventKind::Completed => write!(f, "Completed"),
            JobEventKind::Failed => write!(f, "Failed"),
            JobEventKind::Stalled => write!(f, "Stalled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    pub kind: JobEventKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobEvent {
    pub fn new(job_id: &str, kind: JobEventKind, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            worker_id: None,
            directory_id: None,
            attempt: None,
            error: None,
        }
    }

    pub fn with_worker(mut self, worker_id: &str) -> Self {
        self.worker_id = Some(worker_id.to_string());
        self
    }

    pub fn with_directory(mut self, directory_id: &str, attempt: u32) -> Self {
        self.directory_id = Some(directory_id.to_string());
        self.attempt = Some(attempt);
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Fans job events out to every subscriber.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Where the queue and processor report transitions.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: JobEvent);
}

/// No-op sink for tests and headless runs.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _event: JobEvent) {}
}

/// Bridges events onto a [`JobEventBroadcaster`].
pub struct BroadcastProgress {
    broadcaster: JobEventBroadcaster,
}

impl BroadcastProgress {
    pub fn new(broadcaster: JobEventBroadcaster) -> Self {
        Self { broadcaster }
    }
}

impl ProgressSink for BroadcastProgress {
    fn emit(&self, event: JobEvent) {
        log::debug!("[{}] {}: {}", event.job_id, event.kind, event.message);
        self.broadcaster.send(event);
    }
}
