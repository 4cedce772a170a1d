//! Batch run integration tests.
//!
//! These tests drive the orchestrator through multi-issue runs and verify
//! entry ordering, failure isolation, and the merge gate strategies.

use std::sync::Arc;

use gaffer::config::{Config, MergeStrategy};
use gaffer::events::{self, PipelineEvent};
use gaffer::report::TaskOutcome;

use crate::fixtures::{
    gh_issue, RunHarness, ScriptedAgent, ScriptedTracker, ScriptedVcs, APPROVED, CHANGES,
};

/// Test: Sequential run isolates failures
/// Given three issues where the second never earns approval
/// When the batch runs sequentially
/// Then the second entry fails and the others complete
#[tokio::test]
async fn test_sequential_run_isolates_failures() {
    let mut harness = RunHarness::new(
        ScriptedAgent::always("claude-code", "done"),
        ScriptedAgent::scripted("claude-code", &[APPROVED, CHANGES, APPROVED]),
        ScriptedVcs::new(),
        ScriptedTracker::new(),
    );
    harness.config = Arc::new(Config {
        max_review_rounds: 1,
        ..Config::default()
    });

    let report = harness
        .orchestrator()
        .run(vec![
            gh_issue("1", "Add request ids"),
            gh_issue("2", "Fix flaky retries"),
            gh_issue("3", "Tighten timeouts"),
        ])
        .await;

    assert_eq!(report.entries.len(), 3);
    assert_eq!(report.entries[0].task, "#1");
    assert!(report.entries[0].outcome.is_success());

    assert_eq!(report.entries[1].task, "#2");
    match &report.entries[1].outcome {
        TaskOutcome::Failed { error } => assert!(error.contains("review rounds")),
        other => panic!("expected #2 to fail, got {other:?}"),
    }
    assert_eq!(report.entries[1].rounds, 1);

    assert_eq!(report.entries[2].task, "#3");
    assert!(report.entries[2].outcome.is_success());

    assert!(!report.all_succeeded());
    // One implementation per issue plus one fix-up round for #2.
    assert_eq!(harness.coder.call_count(), 4);
}

/// Test: Auto merge gate between sequential tasks
/// Given two issues and the auto merge strategy
/// When the batch runs sequentially
/// Then each change merges and the base syncs before the next task
#[tokio::test]
async fn test_sequential_auto_merge_gate() {
    let (events, mut rx) = events::channel();
    let mut harness = RunHarness::new(
        ScriptedAgent::always("claude-code", "done"),
        ScriptedAgent::always("claude-code", APPROVED),
        ScriptedVcs::new(),
        ScriptedTracker::new(),
    );
    harness.config = Arc::new(Config {
        merge_strategy: MergeStrategy::Auto,
        ..Config::default()
    });
    harness.events = events;

    let report = harness
        .orchestrator()
        .run(vec![
            gh_issue("1", "Add request ids"),
            gh_issue("2", "Fix flaky retries"),
        ])
        .await;

    assert!(report.all_succeeded());
    for entry in &report.entries {
        assert!(
            matches!(entry.outcome, TaskOutcome::Completed { merged: true, .. }),
            "expected merged completion for {}, got {:?}",
            entry.task,
            entry.outcome
        );
    }

    // The first change lands before the second task's workspace exists, so
    // task 2 branches from a base that already contains task 1.
    let merge_at = harness.vcs.call_index("merge_change #101 squash");
    let second_workspace_at = harness.vcs.call_index("create_workspace 2");
    assert!(merge_at < second_workspace_at);

    let syncs = harness
        .vcs
        .calls()
        .iter()
        .filter(|call| call.as_str() == "sync_base_branch main")
        .count();
    assert_eq!(syncs, 2);

    let mut merging_at = None;
    let mut merged_at = None;
    let mut position = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            PipelineEvent::Merging { number: 101, .. } => merging_at = Some(position),
            PipelineEvent::Merged { number: 101, .. } => merged_at = Some(position),
            _ => {}
        }
        position += 1;
    }
    assert!(merging_at.expect("Merging event") < merged_at.expect("Merged event"));
}

/// Test: Parallel run preserves input order and defers merging
/// Given three issues with two workers and the auto merge strategy
/// When the batch runs in parallel
/// Then entries keep input order and no change merges mid-run
#[tokio::test]
async fn test_parallel_run_keeps_input_order_and_skips_merge_gates() {
    let mut harness = RunHarness::new(
        ScriptedAgent::always("claude-code", "done"),
        ScriptedAgent::always("claude-code", APPROVED),
        ScriptedVcs::new(),
        ScriptedTracker::new(),
    );
    harness.config = Arc::new(Config {
        sequential: false,
        parallel_workers: 2,
        merge_strategy: MergeStrategy::Auto,
        ..Config::default()
    });

    let report = harness
        .orchestrator()
        .run(vec![
            gh_issue("1", "Add request ids"),
            gh_issue("2", "Fix flaky retries"),
            gh_issue("3", "Tighten timeouts"),
        ])
        .await;

    let tasks: Vec<&str> = report.entries.iter().map(|e| e.task.as_str()).collect();
    assert_eq!(tasks, vec!["#1", "#2", "#3"]);
    assert!(report.all_succeeded());

    // Parallel siblings all branch from the same base, so merging waits
    // for the operator even under the auto strategy.
    let calls = harness.vcs.calls();
    assert!(calls.iter().all(|call| !call.starts_with("merge_change")));
    for entry in &report.entries {
        assert!(matches!(
            entry.outcome,
            TaskOutcome::Completed { merged: false, .. }
        ));
    }
}

/// Test: Wait strategy polls the forge
/// Given a change that someone merges upstream
/// When the run uses the wait merge strategy
/// Then the task completes merged after polling, without merging itself
#[tokio::test]
async fn test_wait_strategy_polls_forge_then_syncs() {
    let mut harness = RunHarness::new(
        ScriptedAgent::always("claude-code", "done"),
        ScriptedAgent::always("claude-code", APPROVED),
        ScriptedVcs::new(),
        ScriptedTracker::new(),
    );
    harness.config = Arc::new(Config {
        merge_strategy: MergeStrategy::Wait,
        ..Config::default()
    });
    // The first change this run publishes is #101.
    harness.vcs.mark_merged_upstream(101);

    let report = harness
        .orchestrator()
        .run(vec![gh_issue("1", "Add request ids")])
        .await;

    assert!(matches!(
        report.entries[0].outcome,
        TaskOutcome::Completed { merged: true, .. }
    ));

    let calls = harness.vcs.calls();
    assert!(calls.contains(&"is_merged #101".to_string()));
    assert!(calls.contains(&"sync_base_branch main".to_string()));
    assert!(calls.iter().all(|call| !call.starts_with("merge_change")));
}

/// Test: Auto merge failure leaves the change open
/// Given a forge that rejects the merge call
/// When the run uses the auto merge strategy
/// Then the task still completes, unmerged, and the base never syncs
#[tokio::test]
async fn test_auto_merge_failure_leaves_change_open() {
    let mut harness = RunHarness::new(
        ScriptedAgent::always("claude-code", "done"),
        ScriptedAgent::always("claude-code", APPROVED),
        ScriptedVcs::new().failing_merge(),
        ScriptedTracker::new(),
    );
    harness.config = Arc::new(Config {
        merge_strategy: MergeStrategy::Auto,
        ..Config::default()
    });

    let report = harness
        .orchestrator()
        .run(vec![gh_issue("1", "Add request ids")])
        .await;

    assert!(matches!(
        report.entries[0].outcome,
        TaskOutcome::Completed { merged: false, .. }
    ));
    assert!(report.all_succeeded());
    assert!(!harness
        .vcs
        .calls()
        .contains(&"sync_base_branch main".to_string()));
}

/// Test: Cancelled run records cancelled entries
/// Given a cancellation requested before the run starts
/// When the batch runs
/// Then every entry is cancelled and no work reaches the seams
#[tokio::test]
async fn test_cancelled_run_records_cancelled_entries() {
    let harness = RunHarness::new(
        ScriptedAgent::always("claude-code", "done"),
        ScriptedAgent::always("claude-code", APPROVED),
        ScriptedVcs::new(),
        ScriptedTracker::new(),
    );
    harness.cancel.cancel();

    let report = harness
        .orchestrator()
        .run(vec![
            gh_issue("1", "Add request ids"),
            gh_issue("2", "Fix flaky retries"),
        ])
        .await;

    assert_eq!(report.entries.len(), 2);
    for entry in &report.entries {
        assert_eq!(entry.outcome, TaskOutcome::Cancelled);
    }
    assert!(!report.all_succeeded());
    assert_eq!(harness.coder.call_count(), 0);
    assert!(harness.vcs.calls().is_empty());
}
