//! Scripted submission executor.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use dirqueue::processor::{AttemptResult, FailureKind, SubmissionExecutor, SubmissionRequest};

/// Replays queued results per directory. Once a directory's script runs
/// out, it falls back to that directory's default (success unless set).
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, VecDeque<AttemptResult>>>,
    defaults: Mutex<HashMap<String, AttemptResult>>,
    calls: Mutex<Vec<(String, u32)>>,
    delay: Mutex<Duration>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results returned, in order, for the next attempts on `directory_id`.
    pub fn script(&self, directory_id: &str, results: Vec<AttemptResult>) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(directory_id.to_string(), results.into());
        self
    }

    /// Every attempt on `directory_id` fails with `kind`.
    pub fn always_fail(&self, directory_id: &str, kind: FailureKind) -> &Self {
        self.defaults.lock().unwrap().insert(
            directory_id.to_string(),
            AttemptResult::failure(kind, format!("{} always fails", directory_id)),
        );
        self
    }

    /// Sleep this long inside every attempt.
    pub fn with_delay(&self, delay: Duration) -> &Self {
        *self.delay.lock().unwrap() = delay;
        self
    }

    /// (directory id, attempt number) of every call, in order.
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn attempts_on(&self, directory_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == directory_id)
            .count()
    }
}

impl SubmissionExecutor for ScriptedExecutor {
    fn submit(&self, request: &SubmissionRequest) -> AttemptResult {
        let id = request.directory.id.clone();
        self.calls.lock().unwrap().push((id.clone(), request.attempt));

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        if let Some(result) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&id)
            .and_then(|q| q.pop_front())
        {
            return result;
        }
        self.defaults
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| AttemptResult::success(Some(&format!("https://{}.example/listing", id))))
    }
}
