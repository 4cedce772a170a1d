//! Git and GitHub CLI implementation of the version-control seam.
//!
//! Local repository questions (does a branch exist, is the tree dirty) go
//! through libgit2; everything that mutates state or talks to the forge
//! shells out to `git` and `gh` so it picks up the user's credentials,
//! hooks, and config exactly as the command line would.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::{branch_for, ChangeRequest, Vcs, Workspace, WORKSPACES_DIR};
use crate::config::MergeMethod;
use crate::review::ReviewVerdict;
use crate::{glog_debug, glog_warn, Error, Result};

pub struct GitVcs {
    root: PathBuf,
}

impl GitVcs {
    /// Open the repository containing the current directory.
    pub fn open() -> Result<Self> {
        let repo = git2::Repository::discover(std::env::current_dir()?)?;
        let root = repo
            .workdir()
            .ok_or_else(|| Error::Validation("bare repositories are not supported".to_string()))?
            .to_path_buf();
        Ok(Self { root })
    }

    /// Open the repository rooted at an explicit path.
    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn branch_exists(&self, branch: &str) -> bool {
        git2::Repository::open(&self.root)
            .and_then(|repo| repo.find_branch(branch, git2::BranchType::Local).map(|_| ()))
            .is_ok()
    }

    /// Run git and return trimmed stdout, failing on nonzero exit.
    async fn run_git(&self, args: &[&str], cwd: &Path) -> Result<String> {
        glog_debug!("git {} (cwd {})", args.join(" "), cwd.display());
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(Error::Io)?;
        if !output.status.success() {
            return Err(Error::Command(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run git for effect only; returns whether it succeeded.
    async fn git_ok(&self, args: &[&str], cwd: &Path) -> bool {
        glog_debug!("git {} (cwd {}, unchecked)", args.join(" "), cwd.display());
        Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Run gh and return trimmed stdout, failing on nonzero exit.
    async fn run_gh(&self, args: &[&str]) -> Result<String> {
        glog_debug!("gh {}", args.join(" "));
        let output = Command::new("gh")
            .args(args)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    Error::Command("`gh` not found on PATH; the GitHub CLI is required".to_string())
                } else {
                    Error::Io(err)
                }
            })?;
        if !output.status.success() {
            return Err(Error::Command(format!(
                "gh {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Rebase an existing workspace onto the latest base.
    ///
    /// Conflicts reset the branch to `origin/<base>` so the coder starts over
    /// from a clean slate; either way the remote branch is pushed back into
    /// agreement so the coder does not find a diverged remote and merge stale
    /// history back in.
    async fn realign_or_reset(&self, workspace: &Workspace) -> Result<()> {
        let cwd = workspace.path.as_path();
        let upstream = format!("origin/{}", workspace.base);

        // No-op when no rebase is in progress.
        self.git_ok(&["rebase", "--abort"], cwd).await;

        let mut needs_force_push = false;
        if self.git_ok(&["rebase", &upstream], cwd).await {
            // Push only when the rebase rewrote commits that exist remotely.
            let local = self.run_git(&["rev-parse", &workspace.branch], cwd).await?;
            let remote_ref = format!("origin/{}", workspace.branch);
            if let Ok(remote) = self.run_git(&["rev-parse", &remote_ref], cwd).await {
                needs_force_push = remote != local;
            }
        } else {
            self.git_ok(&["rebase", "--abort"], cwd).await;
            self.run_git(&["reset", "--hard", &upstream], cwd).await?;
            needs_force_push = true;
        }

        if needs_force_push {
            // --force, not --force-with-lease: history was rewritten on
            // purpose and the feature ref was never fetched. The push may
            // fail when the remote branch does not exist yet.
            self.git_ok(&["push", "--force", "origin", &workspace.branch], cwd)
                .await;
        }
        Ok(())
    }

    async fn remove_workspace_at(&self, path: &Path, branch: &str) {
        let path_str = path.display().to_string();
        self.git_ok(&["worktree", "remove", &path_str, "--force"], &self.root)
            .await;
        self.git_ok(&["branch", "-D", branch], &self.root).await;
    }

    /// Remove every workspace whose branch carries the gaffer prefix.
    /// Returns the removed paths.
    pub async fn remove_all_workspaces(&self) -> Result<Vec<String>> {
        let raw = self
            .run_git(&["worktree", "list", "--porcelain"], &self.root)
            .await?;
        let mut removed = Vec::new();
        for entry in parse_worktree_list(&raw) {
            let Some(branch) = entry.branch else { continue };
            if !branch.starts_with(super::BRANCH_PREFIX) {
                continue;
            }
            self.remove_workspace_at(&entry.path, &branch).await;
            removed.push(entry.path.display().to_string());
        }
        Ok(removed)
    }
}

#[async_trait]
impl Vcs for GitVcs {
    async fn create_workspace(&self, slug: &str, base_branch: &str) -> Result<Workspace> {
        let branch = branch_for(slug);
        let path = self.root.join(WORKSPACES_DIR).join(format!("issue-{slug}"));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        self.run_git(&["fetch", "origin", base_branch], &self.root)
            .await?;

        let workspace = Workspace {
            slug: slug.to_string(),
            branch: branch.clone(),
            path: path.clone(),
            base: base_branch.to_string(),
        };

        if path.exists() {
            self.realign_or_reset(&workspace).await?;
            return Ok(workspace);
        }

        let path_str = path.display().to_string();
        if self.branch_exists(&branch) {
            // Branch survives but the checkout is gone; re-attach it.
            self.run_git(&["worktree", "add", &path_str, &branch], &self.root)
                .await
                .map_err(|e| workspace_error(slug, e))?;
            self.realign_or_reset(&workspace).await?;
        } else {
            let start = format!("origin/{base_branch}");
            self.run_git(
                &["worktree", "add", "-b", &branch, &path_str, &start],
                &self.root,
            )
            .await
            .map_err(|e| workspace_error(slug, e))?;
        }

        Ok(workspace)
    }

    async fn remove_workspace(&self, workspace: &Workspace) -> Result<()> {
        self.remove_workspace_at(&workspace.path, &workspace.branch)
            .await;
        Ok(())
    }

    async fn remove_workspace_for(&self, slug: &str) -> Result<bool> {
        let branch = branch_for(slug);
        let raw = self
            .run_git(&["worktree", "list", "--porcelain"], &self.root)
            .await?;
        for entry in parse_worktree_list(&raw) {
            if entry.branch.as_deref() == Some(branch.as_str()) {
                self.remove_workspace_at(&entry.path, &branch).await;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn has_local_changes(&self, workspace: &Workspace) -> Result<bool> {
        let repo = git2::Repository::open(&workspace.path)?;
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(!statuses.is_empty())
    }

    async fn refresh(&self, workspace: &Workspace) -> Result<()> {
        let cwd = workspace.path.as_path();
        self.git_ok(&["fetch", "origin"], cwd).await;
        let remote_ref = format!("origin/{}", workspace.branch);
        self.git_ok(&["merge", "--ff-only", &remote_ref], cwd).await;
        // Keep the local base ref current so `git diff base...HEAD` works.
        let base_spec = format!("{0}:{0}", workspace.base);
        self.git_ok(&["fetch", "origin", &base_spec], cwd).await;
        Ok(())
    }

    async fn align_with_base(&self, workspace: &Workspace) -> Result<()> {
        let cwd = workspace.path.as_path();
        let upstream = format!("origin/{}", workspace.base);

        // Clear any rebase the coder agent left behind.
        self.git_ok(&["rebase", "--abort"], cwd).await;
        self.git_ok(&["fetch", "origin", &workspace.base], cwd).await;

        if let Err(err) = self.run_git(&["rebase", &upstream], cwd).await {
            // Abort so the workspace is left in a clean state.
            self.git_ok(&["rebase", "--abort"], cwd).await;
            return Err(err);
        }

        self.run_git(
            &["push", "--force-with-lease", "origin", &workspace.branch],
            cwd,
        )
        .await?;
        Ok(())
    }

    async fn push_branch(&self, workspace: &Workspace) -> Result<()> {
        self.run_git(
            &["push", "--set-upstream", "origin", &workspace.branch],
            &workspace.path,
        )
        .await?;
        Ok(())
    }

    async fn find_change(&self, branch: &str) -> Result<Option<ChangeRequest>> {
        let raw = match self
            .run_gh(&["pr", "view", branch, "--json", "number,url,headRefName"])
            .await
        {
            Ok(raw) => raw,
            Err(_) => return Ok(None),
        };
        let view: PrView = serde_json::from_str(&raw)?;
        Ok(Some(view.into_change()))
    }

    async fn find_merged_change(&self, branch: &str) -> Result<Option<ChangeRequest>> {
        let raw = match self
            .run_gh(&[
                "pr",
                "list",
                "--head",
                branch,
                "--state",
                "merged",
                "--json",
                "number,url,headRefName",
                "--limit",
                "1",
            ])
            .await
        {
            Ok(raw) => raw,
            Err(_) => return Ok(None),
        };
        let items: Vec<PrView> = serde_json::from_str(&raw)?;
        Ok(items.into_iter().next().map(PrView::into_change))
    }

    async fn create_change(
        &self,
        workspace: &Workspace,
        title: &str,
        body: &str,
    ) -> Result<ChangeRequest> {
        let url = self
            .run_gh(&[
                "pr",
                "create",
                "--head",
                &workspace.branch,
                "--base",
                &workspace.base,
                "--title",
                title,
                "--body",
                body,
            ])
            .await?;

        if let Some(change) = self.find_change(&workspace.branch).await? {
            return Ok(change);
        }
        // gh printed the URL; recover the number from its tail.
        let number = change_number_from_url(&url)?;
        Ok(ChangeRequest {
            number,
            url,
            branch: workspace.branch.clone(),
        })
    }

    async fn post_review(
        &self,
        change: &ChangeRequest,
        verdict: ReviewVerdict,
        body: &str,
    ) -> Result<()> {
        let number = change.number.to_string();
        match verdict {
            ReviewVerdict::Approved => {
                let approve_body = if body.is_empty() { "LGTM" } else { body };
                let review = self
                    .run_gh(&["pr", "review", &number, "--approve", "--body", approve_body])
                    .await;
                if review.is_err() {
                    // The forge rejects reviews on your own change; fall back
                    // to a plain comment.
                    let fallback = if body.is_empty() {
                        "✅ **Approved** (LGTM)".to_string()
                    } else {
                        format!("✅ **Approved**\n\n{body}")
                    };
                    self.run_gh(&["pr", "comment", &number, "--body", &fallback])
                        .await?;
                }
            }
            ReviewVerdict::ChangesRequested => {
                let review = self
                    .run_gh(&["pr", "review", &number, "--request-changes", "--body", body])
                    .await;
                if review.is_err() {
                    self.run_gh(&["pr", "comment", &number, "--body", body])
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn merge_change(&self, change: &ChangeRequest, method: MergeMethod) -> Result<()> {
        let number = change.number.to_string();
        let flag = format!("--{}", method.as_str());
        self.run_gh(&["pr", "merge", &number, &flag, "--delete-branch"])
            .await?;
        Ok(())
    }

    async fn is_merged(&self, number: u64) -> Result<bool> {
        let raw = self
            .run_gh(&["pr", "view", &number.to_string(), "--json", "state"])
            .await?;
        let data: serde_json::Value = serde_json::from_str(&raw)?;
        Ok(data.get("state").and_then(|v| v.as_str()) == Some("MERGED"))
    }

    async fn sync_base_branch(&self, base_branch: &str) -> Result<()> {
        let upstream = format!("origin/{base_branch}");
        let fetched = self
            .git_ok(&["fetch", "origin", base_branch], &self.root)
            .await;
        let merged = fetched
            && self
                .git_ok(&["merge", "--ff-only", &upstream], &self.root)
                .await;
        if !merged {
            glog_warn!("could not fast-forward {base_branch} after merge");
        }
        Ok(())
    }
}

/// `gh --json` shape shared by `pr view` and `pr list`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrView {
    number: u64,
    url: String,
    head_ref_name: String,
}

impl PrView {
    fn into_change(self) -> ChangeRequest {
        ChangeRequest {
            number: self.number,
            url: self.url,
            branch: self.head_ref_name,
        }
    }
}

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, PartialEq, Eq)]
struct WorktreeEntry {
    path: PathBuf,
    branch: Option<String>,
}

/// Entries are blank-line separated; detached worktrees have no branch line.
fn parse_worktree_list(raw: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut branch: Option<String> = None;

    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("worktree ") {
            path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("branch ") {
            branch = Some(rest.strip_prefix("refs/heads/").unwrap_or(rest).to_string());
        } else if line.is_empty() {
            if let Some(p) = path.take() {
                entries.push(WorktreeEntry {
                    path: p,
                    branch: branch.take(),
                });
            }
            branch = None;
        }
    }
    if let Some(p) = path.take() {
        entries.push(WorktreeEntry {
            path: p,
            branch: branch.take(),
        });
    }
    entries
}

fn change_number_from_url(url: &str) -> Result<u64> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|tail| tail.parse().ok())
        .ok_or_else(|| Error::Validation(format!("could not parse a change number from '{url}'")))
}

fn workspace_error(slug: &str, source: Error) -> Error {
    Error::Workspace {
        slug: slug.to_string(),
        reason: source.to_string(),
    }
}
