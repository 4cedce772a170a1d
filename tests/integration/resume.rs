//! Resume integration tests.
//!
//! These tests run the same issue through two consecutive orchestrator runs
//! sharing one workspace store, and verify that checkpoints resume work
//! instead of redoing it, that `clean` really starts over, and that
//! cancellation leaves the workspace behind for the next invocation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use gaffer::config::Config;
use gaffer::events::EventSender;
use gaffer::orchestrator::Orchestrator;
use gaffer::report::TaskOutcome;
use gaffer::state::STATE_FILE;

use crate::fixtures::{
    gh_issue, CancellingAgent, RunHarness, ScriptedAgent, ScriptedTracker, ScriptedVcs, APPROVED,
    CHANGES,
};

/// Test: Failed run resumes without re-implementing
/// Given a run that exhausted its review rounds and left a checkpoint
/// When a second run picks up the same issue
/// Then review continues at the next round with the saved feedback and the
/// coder is never re-run
#[tokio::test]
async fn test_failed_run_resumes_without_reimplementing() {
    let mut first = RunHarness::new(
        ScriptedAgent::always("claude-code", "done"),
        ScriptedAgent::scripted("claude-code", &[CHANGES]),
        ScriptedVcs::new(),
        ScriptedTracker::new(),
    );
    first.config = Arc::new(Config {
        max_review_rounds: 1,
        ..Config::default()
    });

    let report = first
        .orchestrator()
        .run(vec![gh_issue("42", "Fix flaky retries")])
        .await;
    assert!(matches!(
        report.entries[0].outcome,
        TaskOutcome::Failed { .. }
    ));
    // One implementation plus one fix-up round.
    assert_eq!(first.coder.call_count(), 2);
    assert!(first.vcs.workspace_path("42").join(STATE_FILE).exists());

    let second = RunHarness {
        config: Arc::new(Config::default()),
        vcs: first.vcs.clone(),
        tracker: Arc::new(ScriptedTracker::new()),
        coder: Arc::new(ScriptedAgent::always("claude-code", "done")),
        reviewer: Arc::new(ScriptedAgent::scripted("claude-code", &[APPROVED])),
        events: EventSender::disabled(),
        cancel: CancellationToken::new(),
    };
    let report = second
        .orchestrator()
        .run(vec![gh_issue("42", "Fix flaky retries")])
        .await;

    match &report.entries[0].outcome {
        TaskOutcome::Completed {
            change: Some(change),
            ..
        } => assert_eq!(change.number, 101),
        other => panic!("expected resumed completion, got {other:?}"),
    }
    assert_eq!(report.entries[0].rounds, 2);
    assert_eq!(second.coder.call_count(), 0);

    // The follow-up review carries the first run's findings.
    let review_calls = second.reviewer.calls();
    assert!(review_calls[0].0.contains("previously reviewed"));
    assert!(review_calls[0].0.contains("off by one"));

    // Exactly one change across both runs, and approval cleans up the
    // workspace together with its checkpoint.
    let creates = first
        .vcs
        .calls()
        .iter()
        .filter(|call| call.starts_with("create_change"))
        .count();
    assert_eq!(creates, 1);
    assert!(!first.vcs.workspace_path("42").exists());
}

/// Test: Clean runs start over
/// Given a failed run that left a workspace and a checkpoint
/// When a second run sets `clean`
/// Then the workspace is removed first and the coder starts a fresh
/// conversation, while the already-open change is reused
#[tokio::test]
async fn test_clean_run_restarts_from_scratch() {
    let mut first = RunHarness::new(
        ScriptedAgent::always("claude-code", "done"),
        ScriptedAgent::scripted("claude-code", &[CHANGES]),
        ScriptedVcs::new(),
        ScriptedTracker::new(),
    );
    first.config = Arc::new(Config {
        max_review_rounds: 1,
        ..Config::default()
    });
    let report = first
        .orchestrator()
        .run(vec![gh_issue("42", "Fix flaky retries")])
        .await;
    assert!(matches!(
        report.entries[0].outcome,
        TaskOutcome::Failed { .. }
    ));

    let second = RunHarness {
        config: Arc::new(Config {
            clean: true,
            ..Config::default()
        }),
        vcs: first.vcs.clone(),
        tracker: Arc::new(ScriptedTracker::new()),
        coder: Arc::new(ScriptedAgent::always("claude-code", "done")),
        reviewer: Arc::new(ScriptedAgent::scripted("claude-code", &[APPROVED])),
        events: EventSender::disabled(),
        cancel: CancellationToken::new(),
    };
    let report = second
        .orchestrator()
        .run(vec![gh_issue("42", "Fix flaky retries")])
        .await;

    assert!(matches!(
        report.entries[0].outcome,
        TaskOutcome::Completed { .. }
    ));
    assert_eq!(report.entries[0].rounds, 1);
    assert!(first
        .vcs
        .calls()
        .contains(&"remove_workspace_for 42".to_string()));

    // Fresh conversation: one implement call, no resumed session, no
    // stale review feedback in the prompt.
    assert_eq!(second.coder.call_count(), 1);
    let (prompt, session) = &second.coder.calls()[0];
    assert!(prompt.contains("Fix flaky retries"));
    assert!(!prompt.contains("off by one"));
    assert!(session.is_none());

    let creates = first
        .vcs
        .calls()
        .iter()
        .filter(|call| call.starts_with("create_change"))
        .count();
    assert_eq!(creates, 1);
}

/// Test: Cancellation keeps the workspace
/// Given a coder interrupted mid-call by cancellation
/// When the run winds down
/// Then the entry is cancelled and the half-done workspace stays on disk
#[tokio::test]
async fn test_cancellation_keeps_workspace_for_next_run() {
    let token = CancellationToken::new();
    let vcs = Arc::new(ScriptedVcs::new());
    let orchestrator = Orchestrator::new(
        Arc::new(Config::default()),
        vcs.clone(),
        Arc::new(ScriptedTracker::new()),
        Arc::new(CancellingAgent {
            token: token.clone(),
        }),
        Arc::new(ScriptedAgent::always("claude-code", APPROVED)),
        EventSender::disabled(),
        token,
    );

    let report = orchestrator
        .run(vec![gh_issue("42", "Fix flaky retries")])
        .await;

    assert_eq!(report.entries[0].outcome, TaskOutcome::Cancelled);
    assert!(vcs.workspace_path("42").exists());

    let calls = vcs.calls();
    assert!(calls.iter().all(|call| !call.starts_with("remove_workspace")));
    assert!(calls.iter().all(|call| !call.starts_with("create_change")));
}
