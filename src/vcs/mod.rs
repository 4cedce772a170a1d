//! Version-control seam: task workspaces and published change requests.
//!
//! Every task gets its own branch and its own checkout (a git worktree), so
//! parallel pipelines never trample each other's working state. The `Vcs`
//! trait carries exactly the operations the pipeline and orchestrator need;
//! `GitVcs` implements them against git and the GitHub CLI.

mod git;

pub use git::GitVcs;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::MergeMethod;
use crate::review::ReviewVerdict;
use crate::Result;

/// Prefix for branches owned by gaffer.
pub const BRANCH_PREFIX: &str = "gaffer/issue-";

/// Directory under the repository root holding task workspaces.
pub const WORKSPACES_DIR: &str = ".gaffer-worktrees";

/// Branch name for a task slug.
pub fn branch_for(slug: &str) -> String {
    format!("{BRANCH_PREFIX}{slug}")
}

/// A checked-out working tree dedicated to one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Task slug the workspace belongs to.
    pub slug: String,
    /// Feature branch checked out in the workspace.
    pub branch: String,
    /// Directory of the checkout.
    pub path: PathBuf,
    /// Branch the change will merge into.
    pub base: String,
}

/// A published change under review (a pull request).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    /// Forge-assigned number.
    pub number: u64,
    /// Browser URL.
    pub url: String,
    /// Head branch the change was published from.
    pub branch: String,
}

/// Version-control operations the pipelines drive.
///
/// Workspace removal is best-effort: a workspace that is already gone is not
/// an error. Everything that talks to the forge goes through the `gh` CLI in
/// the real implementation, so authentication rides on the user's setup.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Create (or re-attach, or realign) the workspace for `slug`.
    ///
    /// An existing workspace is reused after rebasing onto the latest base;
    /// if the rebase hits conflicts the branch is reset to the base so the
    /// coder starts over from a clean slate.
    async fn create_workspace(&self, slug: &str, base_branch: &str) -> Result<Workspace>;

    /// Remove the workspace and delete its branch.
    async fn remove_workspace(&self, workspace: &Workspace) -> Result<()>;

    /// Remove whatever workspace exists for `slug`, if any. Used for clean
    /// starts, where leftover checkpoints must not influence the new run.
    /// Returns whether one was removed.
    async fn remove_workspace_for(&self, slug: &str) -> Result<bool>;

    /// Whether the workspace has staged, unstaged, or untracked files.
    fn has_local_changes(&self, workspace: &Workspace) -> Result<bool>;

    /// Bring the workspace up to date with its remote branch and base ref.
    /// Best-effort; a missing remote branch is not an error.
    async fn refresh(&self, workspace: &Workspace) -> Result<()>;

    /// Rebase the workspace branch onto the latest base and force-push.
    ///
    /// Keeps the change mergeable when other changes landed on the base
    /// since the workspace was created. Conflicts abort the rebase and
    /// surface as an error; the workspace is left clean for manual fixes.
    async fn align_with_base(&self, workspace: &Workspace) -> Result<()>;

    /// Push the workspace branch to the remote, setting its upstream.
    async fn push_branch(&self, workspace: &Workspace) -> Result<()>;

    /// Find the open change for a head branch.
    async fn find_change(&self, branch: &str) -> Result<Option<ChangeRequest>>;

    /// Find an already-merged change for a head branch.
    async fn find_merged_change(&self, branch: &str) -> Result<Option<ChangeRequest>>;

    /// Publish a change for the workspace branch.
    async fn create_change(
        &self,
        workspace: &Workspace,
        title: &str,
        body: &str,
    ) -> Result<ChangeRequest>;

    /// Post a review with the given verdict on a change.
    async fn post_review(
        &self,
        change: &ChangeRequest,
        verdict: ReviewVerdict,
        body: &str,
    ) -> Result<()>;

    /// Merge an approved change and delete its branch.
    async fn merge_change(&self, change: &ChangeRequest, method: MergeMethod) -> Result<()>;

    /// Whether the change has been merged on the forge.
    async fn is_merged(&self, number: u64) -> Result<bool>;

    /// Fast-forward the local base branch after a merge. Warn-only; a base
    /// that cannot be fast-forwarded does not fail the run.
    async fn sync_base_branch(&self, base_branch: &str) -> Result<()>;
}
