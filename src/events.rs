//! Progress events emitted while pipelines run.
//!
//! Events let the CLI narrate long-running work without the core knowing
//! anything about terminals. Emission is fire-and-forget: a dropped receiver
//! never stalls or fails a pipeline.

use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::vcs::ChangeRequest;

/// Events emitted by pipelines and the orchestrator.
///
/// `issue` is always the display identifier (`#123` or `ENG-123`).
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A pipeline began working on an issue.
    Started {
        issue: String,
    },
    /// The issue's workspace is checked out and aligned.
    WorkspaceReady {
        issue: String,
        path: PathBuf,
    },
    /// The coder agent is running.
    Implementing {
        issue: String,
        /// True when continuing a previously saved session.
        resumed: bool,
    },
    /// A change request exists for the issue's branch.
    ChangePublished {
        issue: String,
        number: u64,
        url: String,
    },
    /// A review round is starting.
    ReviewRound {
        issue: String,
        round: u32,
        max_rounds: u32,
    },
    /// The reviewer returned a verdict for a round.
    Verdict {
        issue: String,
        round: u32,
        approved: bool,
        finding_count: usize,
    },
    /// The coder agent is addressing review feedback.
    ApplyingFeedback {
        issue: String,
        round: u32,
    },
    /// Automatic merge of the approved change is underway.
    Merging {
        issue: String,
        number: u64,
    },
    /// Waiting for someone to merge the change upstream.
    AwaitingMerge {
        issue: String,
        number: u64,
        url: String,
    },
    /// The change landed upstream.
    Merged {
        issue: String,
        number: u64,
    },
    /// An epic group is starting.
    GroupStarted {
        index: usize,
        total: usize,
        members: Vec<String>,
    },
    /// Terminal success for one issue.
    Completed {
        issue: String,
        change: Option<ChangeRequest>,
    },
    /// Terminal failure for one issue.
    Failed {
        issue: String,
        error: String,
    },
    /// The issue never ran (already merged, or an earlier group failed).
    Skipped {
        issue: String,
        reason: String,
    },
    /// Free-form progress note.
    Note {
        issue: String,
        message: String,
    },
}

/// Cloneable handle for emitting [`PipelineEvent`]s.
///
/// A disabled sender drops everything, which keeps test setups small.
#[derive(Debug, Clone, Default)]
pub struct EventSender {
    tx: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl EventSender {
    pub fn new(tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sender that discards every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Send an event. Failures (receiver gone) are ignored.
    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Create a connected sender/receiver pair.
pub fn channel() -> (EventSender, mpsc::UnboundedReceiver<PipelineEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender::new(tx), rx)
}
