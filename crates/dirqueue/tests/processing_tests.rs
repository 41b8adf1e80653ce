//! Processing a claimed job end to end: retries, roll-up, idempotent
//! reporting and emergency stop.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{CatalogBuilder, ConfigBuilder, TestHarness};
use dirqueue::broadcast::JobEventKind;
use dirqueue::catalog::Difficulty;
use dirqueue::coordinator::ControlPlane;
use dirqueue::model::{EntryStatus, JobStatus, PackageTier};
use dirqueue::processor::{
    AttemptResult, FailureKind, ProcessOutcome, ReportedOutcome, SubmissionExecutor,
    SubmissionRequest, ABORT_SUMMARY,
};

fn five_directory_harness() -> TestHarness {
    TestHarness::new(
        CatalogBuilder::new()
            .directory("google", Difficulty::Medium)
            .directory("yelp", Difficulty::Medium)
            .directory("bing", Difficulty::Medium)
            .directory("apple", Difficulty::Medium)
            .directory("foursquare", Difficulty::Medium)
            .build(),
        ConfigBuilder::new().tier(PackageTier::Starter, 5, 100).build(),
    )
}

#[test]
fn test_partial_failure_completes_job() {
    let h = five_directory_harness();
    h.executor
        .always_fail("yelp", FailureKind::Rejected)
        .always_fail("apple", FailureKind::SchemaMismatch);

    h.enqueue("cust-1", "starter", &["google", "yelp", "bing", "apple", "foursquare"]);
    let job = h.claim("w1");
    let outcome = h.processor().process(&job, "w1").unwrap();

    assert_eq!(
        outcome,
        ProcessOutcome::Finished {
            status: JobStatus::Completed,
            error_summary: Some("2 of 5 directories failed: yelp, apple".to_string()),
        }
    );
    // Permanent failures are not retried.
    assert_eq!(h.executor.attempts_on("yelp"), 1);
    assert_eq!(h.executor.attempts_on("apple"), 1);

    let progress = h.app.reporter().progress(&job.id).unwrap();
    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(progress.percentage, 100.0);
    assert_eq!(progress.failed_directories, vec!["yelp", "apple"]);
    assert_eq!(progress.eta_seconds, Some(0));

    let stored = h.app.queue().get(&job.id).unwrap();
    assert!(stored.completed_at.is_some());
}

#[test]
fn test_transient_failures_stop_at_attempt_budget() {
    let h = TestHarness::new(
        CatalogBuilder::new().directory("flaky", Difficulty::Medium).build(),
        ConfigBuilder::new().max_attempts(2, 3, 4).build(),
    );
    h.executor.always_fail("flaky", FailureKind::Network);

    h.enqueue("cust", "growth", &["flaky"]);
    let job = h.claim("w1");
    let outcome = h.processor().process(&job, "w1").unwrap();

    assert_eq!(h.executor.attempts_on("flaky"), 3);
    assert_eq!(
        h.executor.calls(),
        vec![
            ("flaky".to_string(), 1),
            ("flaky".to_string(), 2),
            ("flaky".to_string(), 3)
        ]
    );
    assert!(matches!(
        outcome,
        ProcessOutcome::Finished { status: JobStatus::Failed, .. }
    ));

    let entry = h.app.ledger().entry(&job.id, "flaky").unwrap();
    assert_eq!(entry.status, EntryStatus::Failed);
    assert_eq!(entry.attempt_count, 3);
    assert_eq!(
        entry.last_error.as_deref(),
        Some("network: flaky always fails")
    );
}

#[test]
fn test_retry_then_success() {
    let h = five_directory_harness();
    h.executor.script(
        "bing",
        vec![
            AttemptResult::failure(FailureKind::Timeout, "slow page"),
            AttemptResult::failure(FailureKind::Captcha, "challenge"),
        ],
    );

    h.enqueue("cust", "starter", &["bing"]);
    let job = h.claim("w1");
    let outcome = h.processor().process(&job, "w1").unwrap();

    assert_eq!(
        outcome,
        ProcessOutcome::Finished {
            status: JobStatus::Completed,
            error_summary: None
        }
    );
    let entry = h.app.ledger().entry(&job.id, "bing").unwrap();
    assert_eq!(entry.status, EntryStatus::Succeeded);
    assert_eq!(entry.attempt_count, 3);
    assert_eq!(
        entry.result_url.as_deref(),
        Some("https://bing.example/listing")
    );
}

#[test]
fn test_late_duplicate_report_changes_nothing() {
    let h = five_directory_harness();
    h.enqueue("cust", "starter", &["google", "yelp"]);
    let job = h.claim("w1");
    h.processor().process(&job, "w1").unwrap();

    let ledger = h.app.ledger();
    let before = ledger.entry(&job.id, "google").unwrap();
    let update = ledger
        .report_outcome(
            &job.id,
            "google",
            ReportedOutcome::Succeeded {
                result_url: Some("https://duplicate".to_string()),
            },
        )
        .unwrap();

    assert!(!update.applied);
    assert_eq!(update.entry, before);
    assert_eq!(
        h.app.reporter().progress(&job.id).unwrap().counts.succeeded,
        2
    );
}

/// Succeeds every attempt and engages the emergency stop during attempt
/// number `stop_on`.
struct StopDuringAttempt {
    control: ControlPlane,
    stop_on: usize,
    calls: AtomicUsize,
}

impl SubmissionExecutor for StopDuringAttempt {
    fn submit(&self, _request: &SubmissionRequest) -> AttemptResult {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.stop_on {
            self.control.emergency_stop("operator pulled the plug").unwrap();
        }
        AttemptResult::success(None)
    }
}

#[test]
fn test_emergency_stop_aborts_at_next_directory() {
    let h = five_directory_harness();
    h.enqueue("cust", "starter", &["google", "yelp", "bing", "apple", "foursquare"]);
    let job = h.claim("w1");

    let executor = Arc::new(StopDuringAttempt {
        control: h.app.control().clone(),
        stop_on: 2,
        calls: AtomicUsize::new(0),
    });
    let outcome = h.app.processor(executor.clone()).process(&job, "w1").unwrap();

    assert_eq!(outcome, ProcessOutcome::Aborted);
    // The attempt in flight when the stop landed still finished.
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

    let stored = h.app.queue().get(&job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error_summary.as_deref(), Some(ABORT_SUMMARY));

    let counts = h.app.reporter().progress(&job.id).unwrap().counts;
    assert_eq!(counts.succeeded, 2);
    assert_eq!(counts.skipped, 3);
    assert_eq!(counts.open(), 0);
}

#[test]
fn test_processing_emits_events() {
    let h = five_directory_harness();
    h.executor.script(
        "google",
        vec![AttemptResult::failure(FailureKind::RateLimited, "429")],
    );
    let mut events = h.app.events().subscribe();

    h.enqueue("cust", "starter", &["google"]);
    let job = h.claim("w1");
    h.processor().process(&job, "w1").unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.job_id, job.id);
        kinds.push(event.kind);
    }
    assert_eq!(
        kinds,
        vec![
            JobEventKind::Enqueued,
            JobEventKind::Claimed,
            JobEventKind::Started,
            JobEventKind::EntryStarted,
            JobEventKind::EntryRetrying,
            JobEventKind::EntryStarted,
            JobEventKind::EntrySucceeded,
            JobEventKind::Completed,
        ]
    );
}
