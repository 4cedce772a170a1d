//! Epic execution integration tests.
//!
//! These tests run grouped epic plans end to end: group ordering, failure
//! propagation into later groups, already-merged skips, and plan selection
//! between tracker-native data and the issue body.

use std::sync::Arc;

use gaffer::config::{Config, MergeStrategy};
use gaffer::epic::EpicPlan;
use gaffer::report::TaskOutcome;
use gaffer::vcs::branch_for;

use crate::fixtures::{
    gh_issue, RunHarness, ScriptedAgent, ScriptedTracker, ScriptedVcs, APPROVED, CHANGES,
};

fn plan(parent: &str, groups: &[&[&str]]) -> EpicPlan {
    EpicPlan {
        parent: parent.to_string(),
        groups: groups
            .iter()
            .map(|group| group.iter().map(|slug| slug.to_string()).collect())
            .collect(),
    }
}

/// Test: Epic groups run in order with the parent last
/// Given a two-group plan and the auto merge strategy
/// When the epic runs
/// Then every child and the parent complete merged, in plan order
#[tokio::test]
async fn test_epic_groups_run_in_order_with_parent_last() {
    let mut harness = RunHarness::new(
        ScriptedAgent::always("claude-code", "done"),
        ScriptedAgent::always("claude-code", APPROVED),
        ScriptedVcs::new(),
        ScriptedTracker::new()
            .with_issue(gh_issue("2", "Schema"))
            .with_issue(gh_issue("3", "Migrations"))
            .with_issue(gh_issue("4", "API layer"))
            .with_issue(gh_issue("100", "Epic: rework storage")),
    );
    harness.config = Arc::new(Config {
        merge_strategy: MergeStrategy::Auto,
        ..Config::default()
    });

    let report = harness
        .orchestrator()
        .run_epic(plan("100", &[&["2", "3"], &["4"]]))
        .await;

    let tasks: Vec<&str> = report.entries.iter().map(|e| e.task.as_str()).collect();
    assert_eq!(tasks, vec!["#2", "#3", "#4", "#100"]);
    assert!(report.all_succeeded());
    for entry in &report.entries {
        assert!(
            matches!(entry.outcome, TaskOutcome::Completed { merged: true, .. }),
            "expected merged completion for {}, got {:?}",
            entry.task,
            entry.outcome
        );
    }

    // Children are fetched group by group; the parent only once every
    // group landed.
    assert_eq!(harness.tracker.fetched(), vec!["2", "3", "4", "100"]);
}

/// Test: Group failure skips later groups and the parent
/// Given a plan whose first group never earns approval
/// When the epic runs
/// Then later groups and the parent are reported skipped, not dropped
#[tokio::test]
async fn test_epic_group_failure_skips_later_groups_and_parent() {
    let mut harness = RunHarness::new(
        ScriptedAgent::always("claude-code", "done"),
        ScriptedAgent::always("claude-code", CHANGES),
        ScriptedVcs::new(),
        ScriptedTracker::new().with_issue(gh_issue("2", "Schema")),
    );
    harness.config = Arc::new(Config {
        max_review_rounds: 1,
        ..Config::default()
    });

    let report = harness
        .orchestrator()
        .run_epic(plan("100", &[&["2"], &["3"]]))
        .await;

    assert_eq!(report.entries.len(), 3);
    assert_eq!(report.entries[0].task, "#2");
    assert!(matches!(
        report.entries[0].outcome,
        TaskOutcome::Failed { .. }
    ));
    match &report.entries[1].outcome {
        TaskOutcome::Skipped { reason } => assert_eq!(reason, "an earlier group failed"),
        other => panic!("expected #3 skipped, got {other:?}"),
    }
    match &report.entries[2].outcome {
        TaskOutcome::Skipped { reason } => assert_eq!(reason, "child tasks failed"),
        other => panic!("expected #100 skipped, got {other:?}"),
    }

    // Nothing past the failing group touches the tracker.
    assert_eq!(harness.tracker.fetched(), vec!["2"]);
}

/// Test: Already-merged members are skipped
/// Given a plan member whose change already landed upstream
/// When the epic runs
/// Then the member reports completed-and-merged with zero rounds and the
/// remaining tasks run normally
#[tokio::test]
async fn test_epic_skips_already_merged_members() {
    let harness = RunHarness::new(
        ScriptedAgent::always("claude-code", "done"),
        ScriptedAgent::always("claude-code", APPROVED),
        ScriptedVcs::new().with_merged_change(&branch_for("2"), 55),
        ScriptedTracker::new()
            .with_issue(gh_issue("3", "Migrations"))
            .with_issue(gh_issue("100", "Epic: rework storage")),
    );

    let report = harness
        .orchestrator()
        .run_epic(plan("100", &[&["2"], &["3"]]))
        .await;

    assert_eq!(report.entries.len(), 3);
    assert_eq!(report.entries[0].task, "#2");
    match &report.entries[0].outcome {
        TaskOutcome::Completed {
            change: Some(change),
            merged: true,
        } => assert_eq!(change.number, 55),
        other => panic!("expected #2 already merged, got {other:?}"),
    }
    assert_eq!(report.entries[0].rounds, 0);
    assert!(report.all_succeeded());

    // The merged member is never fetched and never reaches the coder.
    assert_eq!(harness.tracker.fetched(), vec!["3", "100"]);
    assert_eq!(harness.coder.call_count(), 2);
}

/// Test: Tracker-native plans win over the issue body
/// Given a tracker that supplies its own dependency data
/// When the plan is built for an epic whose body names other children
/// Then the tracker's plan is used as-is
#[tokio::test]
async fn test_tracker_native_plan_preferred_over_body() {
    let native = plan("100", &[&["7"]]);
    let harness = RunHarness::new(
        ScriptedAgent::always("claude-code", "done"),
        ScriptedAgent::always("claude-code", APPROVED),
        ScriptedVcs::new(),
        ScriptedTracker::new().with_native_plan(native.clone()),
    );

    let mut epic = gh_issue("100", "Epic: rework storage");
    epic.body = "Children: #2 and #3.".to_string();

    let resolved = harness.orchestrator().epic_plan_for(&epic).await.unwrap();
    assert_eq!(resolved, native);
}

/// Test: Body parsing is the fallback plan source
/// Given a tracker without native dependency data
/// When the plan is built from a dependency-table body
/// Then the table is layered into ordered groups
#[tokio::test]
async fn test_epic_plan_from_body_when_tracker_has_none() {
    let harness = RunHarness::new(
        ScriptedAgent::always("claude-code", "done"),
        ScriptedAgent::always("claude-code", APPROVED),
        ScriptedVcs::new(),
        ScriptedTracker::new(),
    );

    let mut epic = gh_issue("100", "Epic: rework storage");
    epic.body = "| Issue | Depends on |\n\
                 |-------|------------|\n\
                 | #2    | —          |\n\
                 | #3    | —          |\n\
                 | #4    | #2, #3     |\n"
        .to_string();

    let resolved = harness.orchestrator().epic_plan_for(&epic).await.unwrap();
    assert_eq!(resolved, plan("100", &[&["2", "3"], &["4"]]));
}

/// Test: Cancelled epic records every task
/// Given a cancellation requested before the epic starts
/// When the epic runs
/// Then every child and the parent are reported cancelled and no seam is
/// touched
#[tokio::test]
async fn test_cancelled_epic_records_every_task_cancelled() {
    let harness = RunHarness::new(
        ScriptedAgent::always("claude-code", "done"),
        ScriptedAgent::always("claude-code", APPROVED),
        ScriptedVcs::new(),
        ScriptedTracker::new(),
    );
    harness.cancel.cancel();

    let report = harness
        .orchestrator()
        .run_epic(plan("100", &[&["2"], &["3"]]))
        .await;

    assert_eq!(report.entries.len(), 3);
    for entry in &report.entries {
        assert_eq!(entry.outcome, TaskOutcome::Cancelled);
    }
    assert!(!report.all_succeeded());
    assert_eq!(harness.coder.call_count(), 0);
    assert!(harness.vcs.calls().is_empty());
}
