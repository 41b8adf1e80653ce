//! The automation seam: how one submission attempt is performed.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use serde::{Deserialize, Serialize};

use crate::catalog::Directory;

/// Everything an automation worker needs for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub job_id: String,
    pub customer_id: String,
    pub directory: Directory,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    Timeout,
    RateLimited,
    Captcha,
    /// The executor died mid-attempt.
    Crashed,
    Rejected,
    SchemaMismatch,
}

impl FailureKind {
    /// Recoverable failures are retried with backoff; the rest fail the
    /// entry immediately.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FailureKind::Rejected | FailureKind::SchemaMismatch)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Network => "network",
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Captcha => "captcha",
            FailureKind::Crashed => "crashed",
            FailureKind::Rejected => "rejected",
            FailureKind::SchemaMismatch => "schema_mismatch",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptResult {
    Succeeded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_url: Option<String>,
    },
    Failed { kind: FailureKind, message: String },
}

impl AttemptResult {
    pub fn success(result_url: Option<&str>) -> Self {
        AttemptResult::Succeeded {
            result_url: result_url.map(str::to_string),
        }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        AttemptResult::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptResult::Succeeded { .. })
    }
}

/// Performs submissions. Implemented by the browser automation layer.
pub trait SubmissionExecutor: Send + Sync {
    fn submit(&self, request: &SubmissionRequest) -> AttemptResult;
}

/// Wraps an executor with a hard per-attempt timeout.
///
/// The attempt runs on its own thread; if it overruns, the processor moves
/// on with a `Timeout` failure and the straggler's result is discarded.
#[derive(Clone)]
pub struct TimedExecutor {
    inner: Arc<dyn SubmissionExecutor>,
    timeout: Duration,
}

impl TimedExecutor {
    pub fn new(inner: Arc<dyn SubmissionExecutor>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn submit(&self, request: &SubmissionRequest) -> AttemptResult {
        let (tx, rx) = bounded::<AttemptResult>(1);
        let inner = Arc::clone(&self.inner);
        let owned = request.clone();

        let spawned = thread::Builder::new()
            .name(format!("attempt-{}", request.directory.id))
            .spawn(move || {
                let result = inner.submit(&owned);
                let _ = tx.send(result);
            });

        if let Err(e) = spawned {
            log::error!(
                "Failed to spawn attempt thread for {}, running inline: {}",
                request.directory.id,
                e
            );
            return self.inner.submit(request);
        }

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Submission to {} timed out after {:?}",
                    request.directory.id,
                    self.timeout
                );
                AttemptResult::failure(
                    FailureKind::Timeout,
                    format!("attempt timed out after {}s", self.timeout.as_secs_f64()),
                )
            }
            Err(RecvTimeoutError::Disconnected) => {
                AttemptResult::failure(FailureKind::Crashed, "executor terminated without a result")
            }
        }
    }
}
