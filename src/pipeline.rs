//! Single-issue pipeline: workspace, implementation, publish, review loop.
//!
//! One [`Pipeline`] run takes an issue from fetched to approved change
//! request. Every phase transition is checkpointed to the workspace's state
//! file, so a crashed or interrupted run resumes where it stopped instead of
//! re-implementing from scratch. The orchestrator owns everything after
//! approval (merge gates, base sync, reporting).

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::config::{Config, IterationMode};
use crate::events::{EventSender, PipelineEvent};
use crate::issue::{Issue, TrackerKind};
use crate::prompts::{build_coder_prompt, build_review_prompt, CoderContext};
use crate::review::{format_review_body, parse_review_output};
use crate::state::{PipelinePhase, StateRecord};
use crate::tracker::Tracker;
use crate::vcs::{ChangeRequest, Vcs, Workspace};
use crate::{glog, glog_debug, glog_warn, Error, Result};

/// Terminal result of one pipeline run.
#[derive(Debug)]
pub enum PipelineResult {
    /// The change request was approved (or single-pass mode finished).
    Approved { change: ChangeRequest, rounds: u32 },
    /// The run hit a terminal error. The workspace is kept for resuming.
    Failed { error: Error, rounds: u32 },
    /// Cancellation was requested before the run reached a terminal phase.
    Cancelled,
}

impl PipelineResult {
    pub fn is_approved(&self) -> bool {
        matches!(self, PipelineResult::Approved { .. })
    }
}

/// Drives one issue through implement, publish, and review.
///
/// Cheap to clone; every collaborator sits behind an [`Arc`] so parallel
/// orchestration can hand each task its own copy.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    vcs: Arc<dyn Vcs>,
    tracker: Arc<dyn Tracker>,
    coder: Arc<dyn Agent>,
    reviewer: Arc<dyn Agent>,
    events: EventSender,
    cancel: CancellationToken,
}

impl Pipeline {
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

    /// Run the full pipeline for `issue`.
    ///
    /// On approval the workspace and state file are removed; on failure both
    /// are kept so the next run can resume from the last checkpoint.
    pub async fn run(&self, issue: &Issue) -> PipelineResult {
        let display = issue.display_id();
        self.events.emit(PipelineEvent::Started {
            issue: display.clone(),
        });

        let mut rounds = 0;
        match self.run_inner(issue, &mut rounds).await {
            Ok((workspace, change)) => {
                glog!("{} approved after {} review round(s)", display, rounds);
                self.progress(
                    issue,
                    &format!(
                        "✅ gaffer pipeline completed for {display}: {}",
                        change.url
                    ),
                )
                .await;
                self.cleanup(&workspace).await;
                PipelineResult::Approved { change, rounds }
            }
            Err(Error::Cancelled) => {
                glog!("{} cancelled; workspace kept for resume", display);
                PipelineResult::Cancelled
            }
            Err(error) => {
                glog_warn!("{} failed: {}", display, error);
                self.progress(
                    issue,
                    &format!("❌ gaffer pipeline failed for {display}: {error}"),
                )
                .await;
                PipelineResult::Failed { error, rounds }
            }
        }
    }

    async fn run_inner(
        &self,
        issue: &Issue,
        rounds: &mut u32,
    ) -> Result<(Workspace, ChangeRequest)> {
        let display = issue.display_id();
        self.ensure_active()?;

        if self.config.clean && self.vcs.remove_workspace_for(issue.slug()).await? {
            self.events.emit(PipelineEvent::Note {
                issue: display.clone(),
                message: "removed existing workspace for a clean start".to_string(),
            });
        }

        let workspace = self
            .vcs
            .create_workspace(issue.slug(), &self.config.base_branch)
            .await?;
        self.events.emit(PipelineEvent::WorkspaceReady {
            issue: display.clone(),
            path: workspace.path.clone(),
        });

        let saved = StateRecord::load(&workspace.path)?.unwrap_or_default();
        let existing = self.vcs.find_change(&workspace.branch).await?;

        // A published change plus a checkpoint past implementation means the
        // code is already up; skip straight to the review loop.
        let resumable = matches!(
            saved.phase,
            PipelinePhase::Implemented | PipelinePhase::Reviewed | PipelinePhase::FeedbackApplied
        );

        let (mut record, change) = match existing {
            Some(change) if resumable => {
                self.events.emit(PipelineEvent::Note {
                    issue: display.clone(),
                    message: format!(
                        "resuming change #{} from phase {}",
                        change.number, saved.phase
                    ),
                });
                (saved, change)
            }
            _ => self.implement(issue, &workspace, saved).await?,
        };

        if self.config.iteration_mode == IterationMode::SinglePass {
            self.events.emit(PipelineEvent::Note {
                issue: display.clone(),
                message: "single-pass mode, skipping review".to_string(),
            });
            return Ok((workspace, change));
        }

        self.review_loop(issue, &workspace, &change, &mut record, rounds)
            .await?;
        Ok((workspace, change))
    }

    /// Run the coder and make sure a change request exists for the branch.
    ///
    /// Saves the `Implemented` checkpoint before the rebase onto the base
    /// branch, so a rebase conflict still resumes without re-implementing.
    async fn implement(
        &self,
        issue: &Issue,
        workspace: &Workspace,
        saved: StateRecord,
    ) -> Result<(StateRecord, ChangeRequest)> {
        let display = issue.display_id();

        // Keep the saved session even when the change request is gone; the
        // conversation context is still worth resuming.
        let mut record = StateRecord {
            session: saved.session,
            ..StateRecord::default()
        };

        let has_partial_work = self.vcs.has_local_changes(workspace)?;
        if has_partial_work {
            self.events.emit(PipelineEvent::Note {
                issue: display.clone(),
                message: "found uncommitted work from a previous run".to_string(),
            });
        }

        let prompt = build_coder_prompt(&CoderContext {
            branch: workspace.branch.clone(),
            base_branch: workspace.base.clone(),
            issue_slug: issue.slug().to_string(),
            issue_prompt: issue.to_prompt(),
            issue_url: issue.url.clone(),
            has_partial_work,
            is_resume: record.session.is_some(),
        });

        self.events.emit(PipelineEvent::Implementing {
            issue: display.clone(),
            resumed: record.session.is_some() || has_partial_work,
        });
        let outcome = self
            .with_cancel(self.coder.implement(
                &prompt,
                &workspace.path,
                record.session.as_deref(),
                self.config.timeout(),
            ))
            .await?;
        if let Some(session) = outcome.session {
            record.session = Some(session);
        }

        let change = match self.vcs.find_change(&workspace.branch).await? {
            Some(change) => change,
            None => self.publish(issue, workspace).await?,
        };
        self.events.emit(PipelineEvent::ChangePublished {
            issue: display.clone(),
            number: change.number,
            url: change.url.clone(),
        });

        record.advance(PipelinePhase::Implemented)?;
        record.change = Some(change.clone());
        record.save(&workspace.path)?;

        self.progress(
            issue,
            &format!("🤖 Change request published by gaffer: {}", change.url),
        )
        .await;

        // Other changes may have landed on the base while the coder worked.
        self.vcs.align_with_base(workspace).await?;
        Ok((record, change))
    }

    /// Push the branch and open a change request when the agent did not.
    async fn publish(&self, issue: &Issue, workspace: &Workspace) -> Result<ChangeRequest> {
        self.events.emit(PipelineEvent::Note {
            issue: issue.display_id(),
            message: "agent did not publish a change request, creating one".to_string(),
        });
        self.vcs.push_branch(workspace).await?;

        let title = format!("fix: resolve {} - {}", issue.display_id(), issue.title);
        let close_line = match issue.kind {
            TrackerKind::Github => format!("Closes #{}", issue.slug()),
            TrackerKind::Linear => format!("Implements {}", issue.url),
        };
        let body = format!(
            "{close_line}\n\nAutomated implementation by gaffer using `{}`.",
            self.coder.name()
        );
        self.vcs.create_change(workspace, &title, &body).await
    }

    /// Alternate review and fix-up rounds until approval or exhaustion.
    async fn review_loop(
        &self,
        issue: &Issue,
        workspace: &Workspace,
        change: &ChangeRequest,
        record: &mut StateRecord,
        rounds: &mut u32,
    ) -> Result<()> {
        let display = issue.display_id();
        let max_rounds = self.config.max_review_rounds;
        let mut reviewer_session: Option<String> = None;
        let mut last_feedback = record.feedback.clone().unwrap_or_default();

        // Resume bookkeeping. A `Reviewed` checkpoint has feedback that was
        // never applied, so the first loop turn applies it and the round
        // number is reused; `FeedbackApplied` moves straight to the next
        // review round.
        let mut pending_feedback = String::new();
        let start_round = match record.phase {
            PipelinePhase::Reviewed => {
                pending_feedback = last_feedback.clone();
                record.round.max(1)
            }
            PipelinePhase::FeedbackApplied => record.round + 1,
            _ => 1,
        };

        for round in start_round..=max_rounds {
            *rounds = round;
            self.ensure_active()?;

            if !pending_feedback.is_empty() {
                self.apply_feedback(issue, workspace, record, &pending_feedback, round)
                    .await?;
                pending_feedback.clear();
                continue;
            }

            // Pick up anything the fix-up round pushed from another machine.
            self.vcs.refresh(workspace).await?;

            self.events.emit(PipelineEvent::ReviewRound {
                issue: display.clone(),
                round,
                max_rounds,
            });
            let prompt = build_review_prompt(
                change.number,
                &change.branch,
                &workspace.base,
                round,
                &last_feedback,
            );
            let outcome = self
                .with_cancel(self.reviewer.implement(
                    &prompt,
                    &workspace.path,
                    reviewer_session.as_deref(),
                    self.config.timeout(),
                ))
                .await?;
            if let Some(session) = outcome.session {
                reviewer_session = Some(session);
            }

            let review = parse_review_output(&outcome.output);
            self.events.emit(PipelineEvent::Verdict {
                issue: display.clone(),
                round,
                approved: review.approved(),
                finding_count: review.findings.len(),
            });

            let body = if review.findings.is_empty() {
                review.feedback.clone()
            } else {
                format_review_body(&review.findings)
            };
            if let Err(e) = self.vcs.post_review(change, review.verdict, &body).await {
                glog_warn!("could not post review on change #{}: {}", change.number, e);
            }

            if review.approved() {
                return Ok(());
            }

            let mut note = format!("🔍 Review round {round}: changes requested");
            for finding in review.findings.iter().take(5) {
                note.push_str(&format!(
                    "\n- [{}] {}: {}",
                    finding.severity, finding.file, finding.comment
                ));
            }
            self.progress(issue, &note).await;

            last_feedback = review.feedback.clone();
            record.advance(PipelinePhase::Reviewed)?;
            record.round = round;
            record.feedback = Some(review.feedback.clone());
            record.save(&workspace.path)?;

            self.apply_feedback(issue, workspace, record, &review.feedback, round)
                .await?;
        }

        Err(Error::ReviewExhausted { max_rounds })
    }

    /// Hand review feedback back to the coder and checkpoint the result.
    async fn apply_feedback(
        &self,
        issue: &Issue,
        workspace: &Workspace,
        record: &mut StateRecord,
        feedback: &str,
        round: u32,
    ) -> Result<()> {
        self.events.emit(PipelineEvent::ApplyingFeedback {
            issue: issue.display_id(),
            round,
        });
        let outcome = self
            .with_cancel(self.coder.apply_feedback(
                feedback,
                &workspace.path,
                record.session.as_deref(),
                self.config.timeout(),
            ))
            .await?;
        if let Some(session) = outcome.session {
            record.session = Some(session);
        }
        record.advance(PipelinePhase::FeedbackApplied)?;
        record.round = round;
        record.save(&workspace.path)?;
        Ok(())
    }

    /// Remove the checkpoint and workspace after approval. Best-effort.
    async fn cleanup(&self, workspace: &Workspace) {
        if let Err(e) = StateRecord::clear(&workspace.path) {
            glog_warn!("could not remove state file: {}", e);
        }
        if let Err(e) = self.vcs.remove_workspace(workspace).await {
            glog_warn!("could not remove workspace {}: {}", workspace.slug, e);
        }
    }

    /// Post a progress comment on the issue. Failures are logged, never fatal.
    async fn progress(&self, issue: &Issue, body: &str) {
        if !self.config.post_progress {
            return;
        }
        if let Err(e) = self.tracker.post_progress(issue, body).await {
            glog_debug!("progress comment not posted: {}", e);
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Race a pipeline step against cancellation.
    ///
    /// Agent subprocesses are spawned with kill-on-drop, so abandoning the
    /// future here also tears the child process down.
    async fn with_cancel<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            result = fut => result,
        }
    }
}
