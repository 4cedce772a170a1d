pub mod config;
pub mod epic;
pub mod error;
pub mod events;
pub mod issue;
pub mod log;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod report;
pub mod review;
pub mod state;

// Integration seams: subprocess agents, forge trackers, git workspaces
pub mod agent;
pub mod tracker;
pub mod vcs;

pub use error::{Error, Result};
pub use issue::{Issue, IssueRef, TrackerKind};
