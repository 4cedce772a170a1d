//! Per-workspace pipeline state, persisted across runs for resume.
//!
//! Each workspace carries a small JSON file recording the last phase the
//! pipeline completed there. A later run loads it, validates the phase, and
//! dispatches back into the matching stage instead of starting over.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vcs::ChangeRequest;
use crate::{Error, Result};

/// File name of the state record inside a workspace.
pub const STATE_FILE: &str = ".gaffer-state.json";

/// Checkpointed pipeline phases, in the order a run moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    /// No checkpoint yet; implementation has not completed.
    Start,
    /// Code written and published as a change request.
    Implemented,
    /// A review round produced feedback that has not been applied yet.
    Reviewed,
    /// Feedback applied; the next review round has not run yet.
    FeedbackApplied,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::Start => "start",
            PipelinePhase::Implemented => "implemented",
            PipelinePhase::Reviewed => "reviewed",
            PipelinePhase::FeedbackApplied => "feedback_applied",
        }
    }

    /// Whether a transition from `self` to `to` is legal.
    ///
    /// Implementation happens once; after that the review loop alternates
    /// between `Reviewed` and `FeedbackApplied` until approval.
    pub fn can_transition(&self, to: PipelinePhase) -> bool {
        matches!(
            (self, to),
            (PipelinePhase::Start, PipelinePhase::Implemented)
                | (PipelinePhase::Implemented, PipelinePhase::Reviewed)
                | (PipelinePhase::Reviewed, PipelinePhase::FeedbackApplied)
                | (PipelinePhase::FeedbackApplied, PipelinePhase::Reviewed)
        )
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything a later run needs to pick up where this one stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    /// Last phase that completed.
    pub phase: PipelinePhase,
    /// Agent session identifier, for resuming the coder conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    /// Review round the saved phase belongs to.
    #[serde(default)]
    pub round: u32,
    /// The published change request, once one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<ChangeRequest>,
    /// Reviewer feedback captured at `Reviewed`, consumed at `FeedbackApplied`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl Default for StateRecord {
    fn default() -> Self {
        Self {
            phase: PipelinePhase::Start,
            session: None,
            round: 0,
            change: None,
            feedback: None,
        }
    }
}

impl StateRecord {
    /// Move to `phase`, rejecting transitions the pipeline never makes.
    pub fn advance(&mut self, phase: PipelinePhase) -> Result<()> {
        if !self.phase.can_transition(phase) {
            return Err(Error::InvalidPhaseTransition {
                from: self.phase.as_str().to_string(),
                to: phase.as_str().to_string(),
            });
        }
        self.phase = phase;
        Ok(())
    }

    pub fn path(workspace_dir: &Path) -> PathBuf {
        workspace_dir.join(STATE_FILE)
    }

    /// Load the saved record from a workspace, if one exists.
    ///
    /// A corrupt record is treated as absent; losing a checkpoint costs one
    /// re-run of a phase, which is always safe.
    pub fn load(workspace_dir: &Path) -> Result<Option<StateRecord>> {
        let path = Self::path(workspace_dir);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                crate::glog_warn!("discarding corrupt state file {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    pub fn save(&self, workspace_dir: &Path) -> Result<()> {
        let path = Self::path(workspace_dir);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(())
    }

    /// Remove the state file. Missing files are fine.
    pub fn clear(workspace_dir: &Path) -> Result<()> {
        let path = Self::path(workspace_dir);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
