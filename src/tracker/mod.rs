//! Issue-tracker seam: where tasks come from and where progress goes back.
//!
//! Two trackers exist: GitHub issues (through the `gh` CLI) and Linear
//! (through its GraphQL API). The pipeline never branches on the tracker
//! kind; everything tracker-specific sits behind this trait.

mod github;
mod linear;

pub use github::GithubTracker;
pub use linear::LinearTracker;

use async_trait::async_trait;

use crate::config::Config;
use crate::epic::EpicPlan;
use crate::issue::{Issue, IssueRef, TrackerKind};
use crate::Result;

#[async_trait]
pub trait Tracker: Send + Sync {
    /// Fetch the full issue behind a reference, including comments.
    async fn fetch(&self, reference: &IssueRef) -> Result<Issue>;

    /// Post a progress note on the issue. Callers treat failures as
    /// non-fatal; implementations may make it a no-op.
    async fn post_progress(&self, issue: &Issue, body: &str) -> Result<()>;

    /// A tracker-native dependency plan for an epic, for trackers that model
    /// child issues and blocking relations themselves. The default says
    /// "no native plan" and leaves ordering to the issue body.
    async fn epic_plan(&self, _issue: &Issue) -> Result<Option<EpicPlan>> {
        Ok(None)
    }
}

/// Construct the tracker for a reference kind.
pub fn tracker_for(kind: TrackerKind, config: &Config) -> Result<Box<dyn Tracker>> {
    match kind {
        TrackerKind::Github => Ok(Box::new(GithubTracker::new())),
        TrackerKind::Linear => Ok(Box::new(LinearTracker::new(&config.linear_api_key)?)),
    }
}
