//! Multi-issue dispatch: sequential, parallel, and epic-grouped runs.
//!
//! The orchestrator owns the run: it builds one [`Pipeline`] per issue,
//! schedules them under the configured concurrency policy, drives the merge
//! gate between tasks, and folds every terminal outcome into a [`RunReport`].
//! It never retries a failed pipeline and never mutates a pipeline's
//! checkpoint; those belong to the pipeline itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::config::{Config, MergeStrategy};
use crate::epic::{self, EpicPlan};
use crate::events::{EventSender, PipelineEvent};
use crate::issue::{parse_issue_ref, Issue};
use crate::pipeline::{Pipeline, PipelineResult};
use crate::report::{ReportEntry, RunReport, TaskOutcome};
use crate::tracker::Tracker;
use crate::vcs::{branch_for, ChangeRequest, Vcs};
use crate::{glog, glog_debug, glog_warn, Error, Result};

/// Interval between merge checks while waiting for an external merge.
const MERGE_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Runs batches of issues and aggregates their outcomes.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<Config>,
    vcs: Arc<dyn Vcs>,
    tracker: Arc<dyn Tracker>,
    coder: Arc<dyn Agent>,
    reviewer: Arc<dyn Agent>,
    events: EventSender,
    cancel: CancellationToken,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        vcs: Arc<dyn Vcs>,
        tracker: Arc<dyn Tracker>,
        coder: Arc<dyn Agent>,
        reviewer: Arc<dyn Agent>,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            vcs,
            tracker,
            coder,
            reviewer,
            events,
            cancel,
        }
    }

    /// Each pipeline observes a child token, so cancelling the run tears
    /// down every in-flight task.
    fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            self.config.clone(),
            self.vcs.clone(),
            self.tracker.clone(),
            self.coder.clone(),
            self.reviewer.clone(),
            self.events.clone(),
            self.cancel.child_token(),
        )
    }

    /// Run a batch of issues under the configured concurrency policy.
    pub async fn run(&self, issues: Vec<Issue>) -> RunReport {
        let mut report = RunReport::new();
        glog!(
            "run {}: {} issue(s), {}",
            report.id.short(),
            issues.len(),
            if self.config.sequential {
                "sequential"
            } else {
                "parallel"
            }
        );

        if self.config.sequential {
            self.run_sequential(issues, &mut report).await;
        } else {
            // Parallel siblings all branch from the same base, so there is
            // no merge gate between them; changes stay open for the caller.
            for entry in self.run_bounded(issues).await {
                report.record(entry);
            }
        }

        report.finish();
        glog!("{}", report.summary());
        report
    }

    /// Build the execution plan for an epic issue.
    ///
    /// Trackers with native dependency data supply the plan; otherwise the
    /// plan is parsed out of the issue body.
    pub async fn epic_plan_for(&self, issue: &Issue) -> Result<EpicPlan> {
        if let Some(plan) = self.tracker.epic_plan(issue).await? {
            return Ok(plan);
        }
        epic::resolve(issue)
    }

    /// Execute an epic plan: groups in order, members of a group through the
    /// bounded worker pool, merge gates between, and the parent issue last.
    ///
    /// A failure inside a group stops the epic; every task in a later group
    /// is reported as skipped, never silently dropped.
    pub async fn run_epic(&self, plan: EpicPlan) -> RunReport {
        let mut report = RunReport::new();
        glog!(
            "run {}: epic {} with {} task(s) across {} group(s)",
            report.id.short(),
            plan.parent,
            plan.total_tasks(),
            plan.groups.len()
        );

        let total = plan.groups.len();
        let mut halted: Option<String> = None;

        for (index, group) in plan.groups.iter().enumerate() {
            if self.cancel.is_cancelled() {
                for slug in group {
                    report.record(ReportEntry::cancelled(display_slug(slug)));
                }
                continue;
            }
            if let Some(reason) = &halted {
                for slug in group {
                    let display = display_slug(slug);
                    self.events.emit(PipelineEvent::Skipped {
                        issue: display.clone(),
                        reason: reason.clone(),
                    });
                    report.record(ReportEntry::skipped(display, reason.clone()));
                }
                continue;
            }

            self.events.emit(PipelineEvent::GroupStarted {
                index: index + 1,
                total,
                members: group.iter().map(|slug| display_slug(slug)).collect(),
            });

            let entries = self.run_group(group).await;
            let group_ok = entries.iter().all(|e| e.outcome.is_success());
            for entry in entries {
                report.record(entry);
            }
            if !group_ok {
                glog_warn!("group {} had failures, stopping epic", index + 1);
                halted = Some("an earlier group failed".to_string());
            }
        }

        // The parent issue runs last; it may carry integration work that
        // depends on every child having landed.
        let parent_display = display_slug(&plan.parent);
        if self.cancel.is_cancelled() {
            report.record(ReportEntry::cancelled(parent_display));
        } else if halted.is_some() {
            self.events.emit(PipelineEvent::Skipped {
                issue: parent_display.clone(),
                reason: "child tasks failed".to_string(),
            });
            report.record(ReportEntry::skipped(parent_display, "child tasks failed"));
        } else {
            let entry = self.run_epic_member(&plan.parent).await;
            report.record(entry);
        }

        report.finish();
        glog!("{}", report.summary());
        report
    }

    /// One at a time, in input order. A failure is recorded and the next
    /// task starts; the merge gate runs between tasks so each next task
    /// branches from a freshly synced base.
    async fn run_sequential(&self, issues: Vec<Issue>, report: &mut RunReport) {
        for issue in issues {
            if self.cancel.is_cancelled() {
                report.record(ReportEntry::cancelled(issue.display_id()));
                continue;
            }
            let mut entry = self.run_single(&issue).await;
            if let Err(e) = self.merge_gate(&mut entry).await {
                glog!("merge gate interrupted for {}: {}", entry.task, e);
            }
            report.record(entry);
        }
    }

    /// Run all issues against the bounded worker pool. Entries come back in
    /// input order regardless of completion order.
    async fn run_bounded(&self, issues: Vec<Issue>) -> Vec<ReportEntry> {
        let displays: Vec<String> = issues.iter().map(|i| i.display_id()).collect();
        let workers = self.config.parallel_workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));

        let mut tasks = JoinSet::new();
        for (index, issue) in issues.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let orchestrator = self.clone();
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, ReportEntry::cancelled(issue.display_id())),
                };
                (index, orchestrator.run_single(&issue).await)
            });
        }

        let mut slots: Vec<Option<ReportEntry>> = Vec::new();
        slots.resize_with(displays.len(), || None);
        let mut join_failure: Option<String> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, entry)) => slots[index] = Some(entry),
                Err(e) => {
                    let err = Error::TaskJoin(e.to_string());
                    glog_warn!("{}", err);
                    join_failure = Some(err.to_string());
                }
            }
        }

        slots
            .into_iter()
            .zip(displays)
            .map(|(slot, display)| {
                slot.unwrap_or_else(|| {
                    let reason = join_failure
                        .clone()
                        .unwrap_or_else(|| "worker task lost".to_string());
                    ReportEntry::failed(display, reason, 0)
                })
            })
            .collect()
    }

    /// Run one epic group: members with an already-merged change are
    /// skipped, the rest are fetched and run, then merge gates apply one at
    /// a time even when the group itself ran in parallel.
    async fn run_group(&self, group: &[String]) -> Vec<ReportEntry> {
        let mut entries = Vec::new();
        let mut pending = Vec::new();
        for slug in group {
            match self.already_merged_entry(slug).await {
                Some(entry) => entries.push(entry),
                None => pending.push(slug.clone()),
            }
        }

        let mut issues = Vec::new();
        for slug in &pending {
            match self.fetch_by_slug(slug).await {
                Ok(issue) => issues.push(issue),
                Err(e) => {
                    glog_warn!("could not fetch {}: {}", slug, e);
                    entries.push(ReportEntry::failed(display_slug(slug), e.to_string(), 0));
                }
            }
        }

        let mut ran = match issues.len() {
            0 => Vec::new(),
            1 => vec![self.run_single(&issues[0]).await],
            _ => self.run_bounded(issues).await,
        };

        for entry in &mut ran {
            if let Err(e) = self.merge_gate(entry).await {
                glog!("merge gate interrupted for {}: {}", entry.task, e);
                break;
            }
        }
        entries.extend(ran);
        entries
    }

    /// Run the parent epic issue, subject to the same already-merged skip
    /// as its children.
    async fn run_epic_member(&self, slug: &str) -> ReportEntry {
        if let Some(entry) = self.already_merged_entry(slug).await {
            return entry;
        }
        match self.fetch_by_slug(slug).await {
            Ok(issue) => {
                let mut entry = self.run_single(&issue).await;
                if let Err(e) = self.merge_gate(&mut entry).await {
                    glog!("merge gate interrupted for {}: {}", entry.task, e);
                }
                entry
            }
            Err(e) => {
                glog_warn!("could not fetch {}: {}", slug, e);
                ReportEntry::failed(display_slug(slug), e.to_string(), 0)
            }
        }
    }

    /// Run one pipeline and fold its result into a report entry.
    async fn run_single(&self, issue: &Issue) -> ReportEntry {
        let display = issue.display_id();
        match self.pipeline().run(issue).await {
            PipelineResult::Approved { change, rounds } => {
                self.events.emit(PipelineEvent::Completed {
                    issue: display.clone(),
                    change: Some(change.clone()),
                });
                ReportEntry::completed(display, Some(change), false, rounds)
            }
            PipelineResult::Failed { error, rounds } => {
                self.events.emit(PipelineEvent::Failed {
                    issue: display.clone(),
                    error: error.to_string(),
                });
                ReportEntry::failed(display, error.to_string(), rounds)
            }
            PipelineResult::Cancelled => ReportEntry::cancelled(display),
        }
    }

    /// Drive an approved change through the configured merge strategy.
    ///
    /// `skip` leaves the change open. `auto` merges it with the configured
    /// method. `wait` polls until someone merges it upstream. After either
    /// kind of merge the local base branch is synced exactly once, so the
    /// next task or group branches from the updated base.
    ///
    /// A failed merge leaves the entry completed-but-unmerged; only
    /// cancellation while waiting surfaces as an error.
    async fn merge_gate(&self, entry: &mut ReportEntry) -> Result<()> {
        if self.config.merge_strategy == MergeStrategy::Skip {
            return Ok(());
        }
        let TaskOutcome::Completed {
            change: Some(change),
            merged: false,
        } = &entry.outcome
        else {
            return Ok(());
        };
        let change = change.clone();
        let issue = entry.task.clone();

        match self.config.merge_strategy {
            MergeStrategy::Skip => return Ok(()),
            MergeStrategy::Auto => {
                self.events.emit(PipelineEvent::Merging {
                    issue: issue.clone(),
                    number: change.number,
                });
                if let Err(e) = self
                    .vcs
                    .merge_change(&change, self.config.merge_method)
                    .await
                {
                    glog_warn!("could not merge change #{}: {}", change.number, e);
                    self.events.emit(PipelineEvent::Note {
                        issue,
                        message: format!(
                            "merge failed, leaving change #{} open: {e}",
                            change.number
                        ),
                    });
                    return Ok(());
                }
            }
            MergeStrategy::Wait => {
                self.events.emit(PipelineEvent::AwaitingMerge {
                    issue: issue.clone(),
                    number: change.number,
                    url: change.url.clone(),
                });
                self.wait_for_merge(change.number).await?;
            }
        }

        entry.mark_merged();
        self.events.emit(PipelineEvent::Merged {
            issue,
            number: change.number,
        });
        if let Err(e) = self.vcs.sync_base_branch(&self.config.base_branch).await {
            glog_warn!(
                "could not sync {} after merge: {}",
                self.config.base_branch,
                e
            );
        }
        Ok(())
    }

    /// Poll until the change is merged upstream or the run is cancelled.
    async fn wait_for_merge(&self, number: u64) -> Result<()> {
        loop {
            match self.vcs.is_merged(number).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                // Transient forge errors only delay the next poll.
                Err(e) => glog_debug!("merge poll for #{} failed: {}", number, e),
            }
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep(MERGE_POLL_INTERVAL) => {}
            }
        }
    }

    /// A completed-and-merged entry for `slug` when its change already
    /// landed, so re-running a partially finished epic skips done work.
    async fn already_merged_entry(&self, slug: &str) -> Option<ReportEntry> {
        let change = self.merged_change_for(slug).await?;
        let display = display_slug(slug);
        self.events.emit(PipelineEvent::Note {
            issue: display.clone(),
            message: format!("change #{} already merged, skipping", change.number),
        });
        Some(ReportEntry::completed(display, Some(change), true, 0))
    }

    async fn merged_change_for(&self, slug: &str) -> Option<ChangeRequest> {
        match self.vcs.find_merged_change(&branch_for(slug)).await {
            Ok(found) => found,
            Err(e) => {
                glog_debug!("merged-change lookup for {} failed: {}", slug, e);
                None
            }
        }
    }

    async fn fetch_by_slug(&self, slug: &str) -> Result<Issue> {
        let reference = parse_issue_ref(slug)?;
        self.tracker.fetch(&reference).await
    }
}

/// Display form of an epic member slug (`42` becomes `#42`, `ENG-42` stays).
fn display_slug(slug: &str) -> String {
    parse_issue_ref(slug)
        .map(|r| r.to_string())
        .unwrap_or_else(|_| slug.to_string())
}
