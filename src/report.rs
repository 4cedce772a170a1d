//! Run reporting: aggregated outcomes for a batch of issues.
//!
//! The orchestrator builds one [`RunReport`] per invocation. Entries are
//! appended as pipelines reach terminal outcomes and the report is immutable
//! once the run finishes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vcs::ChangeRequest;

/// Unique identifier for one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal outcome of one issue in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum TaskOutcome {
    /// The pipeline finished successfully.
    Completed {
        /// The published change request, when one was opened.
        change: Option<ChangeRequest>,
        /// True once the change landed upstream.
        merged: bool,
    },
    /// The pipeline reached a terminal failure.
    Failed {
        /// Human-readable reason.
        error: String,
    },
    /// The issue never ran (an earlier group failed, or it was filtered out).
    Skipped {
        /// Why it never ran.
        reason: String,
    },
    /// The run was cancelled while this issue was in flight or queued.
    Cancelled,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Completed { .. } => "completed",
            TaskOutcome::Failed { .. } => "failed",
            TaskOutcome::Skipped { .. } => "skipped",
            TaskOutcome::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One (issue, outcome) pair in the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Display identifier of the issue (`#123` or `ENG-123`).
    pub task: String,
    pub outcome: TaskOutcome,
    /// Review rounds consumed before reaching the terminal outcome.
    pub rounds: u32,
}

impl ReportEntry {
    pub fn completed(
        task: impl Into<String>,
        change: Option<ChangeRequest>,
        merged: bool,
        rounds: u32,
    ) -> Self {
        Self {
            task: task.into(),
            outcome: TaskOutcome::Completed { change, merged },
            rounds,
        }
    }

    pub fn failed(task: impl Into<String>, error: impl Into<String>, rounds: u32) -> Self {
        Self {
            task: task.into(),
            outcome: TaskOutcome::Failed {
                error: error.into(),
            },
            rounds,
        }
    }

    pub fn skipped(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            outcome: TaskOutcome::Skipped {
                reason: reason.into(),
            },
            rounds: 0,
        }
    }

    pub fn cancelled(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            outcome: TaskOutcome::Cancelled,
            rounds: 0,
        }
    }

    /// Mark a completed entry's change as merged upstream. No-op otherwise.
    pub fn mark_merged(&mut self) {
        if let TaskOutcome::Completed { merged, .. } = &mut self.outcome {
            *merged = true;
        }
    }

    pub fn change(&self) -> Option<&ChangeRequest> {
        match &self.outcome {
            TaskOutcome::Completed { change, .. } => change.as_ref(),
            _ => None,
        }
    }
}

/// Aggregated outcomes for one orchestrator invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub entries: Vec<ReportEntry>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            id: RunId::new(),
            started_at: Utc::now(),
            finished_at: None,
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn completed_count(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Completed { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Failed { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Skipped { .. }))
    }

    pub fn cancelled_count(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Cancelled))
    }

    fn count(&self, pred: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }

    /// True when every entry completed successfully.
    pub fn all_succeeded(&self) -> bool {
        self.entries.iter().all(|e| e.outcome.is_success())
    }

    /// Multi-line human-readable summary.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Run {}: {} task(s): {} completed, {} failed, {} skipped, {} cancelled\n",
            self.id.short(),
            self.entries.len(),
            self.completed_count(),
            self.failed_count(),
            self.skipped_count(),
            self.cancelled_count(),
        );
        for entry in &self.entries {
            let detail = match &entry.outcome {
                TaskOutcome::Completed { change, merged } => {
                    let url = change.as_ref().map(|c| c.url.as_str()).unwrap_or("—");
                    if *merged {
                        format!("{url} (merged)")
                    } else {
                        url.to_string()
                    }
                }
                TaskOutcome::Failed { error } => error.clone(),
                TaskOutcome::Skipped { reason } => reason.clone(),
                TaskOutcome::Cancelled => String::new(),
            };
            out.push_str(&format!(
                "  {:<10} {:<10} round {:<2} {}\n",
                entry.task,
                entry.outcome.label(),
                entry.rounds,
                detail
            ));
        }
        out
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}
