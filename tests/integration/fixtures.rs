//! Test fixtures for integration tests.
//!
//! Provides scripted stand-ins for the three seams a run crosses:
//! - `ScriptedAgent`: canned coder/reviewer outputs, call recording
//! - `ScriptedVcs`: in-memory forge and workspace directory
//! - `ScriptedTracker`: canned issues and epic plans
//!
//! plus `RunHarness`, which wires them into an orchestrator.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use gaffer::agent::{Agent, AgentOutcome};
use gaffer::config::{Config, MergeMethod};
use gaffer::epic::EpicPlan;
use gaffer::events::EventSender;
use gaffer::issue::{Issue, IssueRef, TrackerKind};
use gaffer::orchestrator::Orchestrator;
use gaffer::review::ReviewVerdict;
use gaffer::tracker::Tracker;
use gaffer::vcs::{branch_for, ChangeRequest, Vcs, Workspace};
use gaffer::{Error, Result};

/// Reviewer output that approves the change.
pub const APPROVED: &str = r#"{"verdict": "approved", "items": [], "comments": "LGTM"}"#;

/// Reviewer output that requests changes with one finding.
pub const CHANGES: &str = r#"{"verdict": "changes_requested", "items": [{"file": "src/lib.rs", "severity": "correctness", "comment": "off by one"}]}"#;

/// An agent that replays scripted outputs and records every call.
///
/// Scripted outputs are consumed in call order; once exhausted, every further
/// call returns the default output. Each call reports a session handle of
/// `<name>-session`.
pub struct ScriptedAgent {
    name: &'static str,
    outputs: Mutex<Vec<String>>,
    default: String,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedAgent {
    pub fn scripted(name: &'static str, outputs: &[&str]) -> Self {
        Self {
            name,
            outputs: Mutex::new(outputs.iter().rev().map(|s| s.to_string()).collect()),
            default: "done".to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// An agent that returns the same output on every call. Useful when the
    /// call order is nondeterministic (parallel runs).
    pub fn always(name: &'static str, output: &str) -> Self {
        Self {
            name,
            outputs: Mutex::new(Vec::new()),
            default: output.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Recorded `(prompt, session)` pairs, in call order.
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn implement(
        &self,
        prompt: &str,
        _workspace: &Path,
        session: Option<&str>,
        _timeout: Duration,
    ) -> Result<AgentOutcome> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), session.map(String::from)));
        let output = self
            .outputs
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| self.default.clone());
        Ok(AgentOutcome {
            output,
            session: Some(format!("{}-session", self.name)),
        })
    }
}

/// An agent that cancels the given token and then never returns, simulating
/// ctrl-c arriving while the agent subprocess is running.
pub struct CancellingAgent {
    pub token: CancellationToken,
}

#[async_trait]
impl Agent for CancellingAgent {
    fn name(&self) -> &'static str {
        "claude-code"
    }

    async fn implement(
        &self,
        _prompt: &str,
        _workspace: &Path,
        _session: Option<&str>,
        _timeout: Duration,
    ) -> Result<AgentOutcome> {
        self.token.cancel();
        std::future::pending().await
    }
}

/// In-memory forge and workspace store.
///
/// Workspaces are real directories under a tempdir, so state checkpoints
/// written by pipelines land on disk and survive across runs within a test.
/// Change requests are numbered from 101 in creation order.
pub struct ScriptedVcs {
    dir: TempDir,
    changes: Mutex<HashMap<String, ChangeRequest>>,
    merged_changes: Mutex<HashMap<String, ChangeRequest>>,
    merged_upstream: Mutex<HashSet<u64>>,
    next_number: Mutex<u64>,
    calls: Mutex<Vec<String>>,
    fail_merge: bool,
}

impl ScriptedVcs {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            changes: Mutex::new(HashMap::new()),
            merged_changes: Mutex::new(HashMap::new()),
            merged_upstream: Mutex::new(HashSet::new()),
            next_number: Mutex::new(101),
            calls: Mutex::new(Vec::new()),
            fail_merge: false,
        }
    }

    /// Seed an open change for a branch, as if a previous run published it.
    pub fn with_change(self, branch: &str, number: u64) -> Self {
        self.changes.lock().unwrap().insert(
            branch.to_string(),
            ChangeRequest {
                number,
                url: format!("https://example.test/pull/{number}"),
                branch: branch.to_string(),
            },
        );
        self
    }

    /// Seed an already-merged change for a branch.
    pub fn with_merged_change(self, branch: &str, number: u64) -> Self {
        self.merged_changes.lock().unwrap().insert(
            branch.to_string(),
            ChangeRequest {
                number,
                url: format!("https://example.test/pull/{number}"),
                branch: branch.to_string(),
            },
        );
        self
    }

    /// Make every `merge_change` call fail, as if the forge rejected it.
    pub fn failing_merge(mut self) -> Self {
        self.fail_merge = true;
        self
    }

    /// Mark a change number as merged upstream, visible to `is_merged`.
    pub fn mark_merged_upstream(&self, number: u64) {
        self.merged_upstream.lock().unwrap().insert(number);
    }

    pub fn workspace_path(&self, slug: &str) -> PathBuf {
        self.dir.path().join(slug)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Index of the first recorded call equal to `needle`, panicking when it
    /// never happened.
    pub fn call_index(&self, needle: &str) -> usize {
        self.calls()
            .iter()
            .position(|c| c == needle)
            .unwrap_or_else(|| panic!("no call {needle:?} in {:?}", self.calls()))
    }

    fn log(&self, entry: impl Into<String>) {
        self.calls.lock().unwrap().push(entry.into());
    }
}

impl Default for ScriptedVcs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Vcs for ScriptedVcs {
    async fn create_workspace(&self, slug: &str, base_branch: &str) -> Result<Workspace> {
        self.log(format!("create_workspace {slug}"));
        let path = self.workspace_path(slug);
        std::fs::create_dir_all(&path).unwrap();
        Ok(Workspace {
            slug: slug.to_string(),
            branch: branch_for(slug),
            path,
            base: base_branch.to_string(),
        })
    }

    async fn remove_workspace(&self, workspace: &Workspace) -> Result<()> {
        self.log(format!("remove_workspace {}", workspace.slug));
        if workspace.path.exists() {
            std::fs::remove_dir_all(&workspace.path).unwrap();
        }
        Ok(())
    }

    async fn remove_workspace_for(&self, slug: &str) -> Result<bool> {
        self.log(format!("remove_workspace_for {slug}"));
        let path = self.workspace_path(slug);
        if path.exists() {
            std::fs::remove_dir_all(&path).unwrap();
            return Ok(true);
        }
        Ok(false)
    }

    fn has_local_changes(&self, _workspace: &Workspace) -> Result<bool> {
        Ok(false)
    }

    async fn refresh(&self, _workspace: &Workspace) -> Result<()> {
        Ok(())
    }

    async fn align_with_base(&self, _workspace: &Workspace) -> Result<()> {
        self.log("align_with_base");
        Ok(())
    }

    async fn push_branch(&self, _workspace: &Workspace) -> Result<()> {
        self.log("push_branch");
        Ok(())
    }

    async fn find_change(&self, branch: &str) -> Result<Option<ChangeRequest>> {
        Ok(self.changes.lock().unwrap().get(branch).cloned())
    }

    async fn find_merged_change(&self, branch: &str) -> Result<Option<ChangeRequest>> {
        Ok(self.merged_changes.lock().unwrap().get(branch).cloned())
    }

    async fn create_change(
        &self,
        workspace: &Workspace,
        title: &str,
        _body: &str,
    ) -> Result<ChangeRequest> {
        let number = {
            let mut next = self.next_number.lock().unwrap();
            let number = *next;
            *next += 1;
            number
        };
        self.log(format!("create_change #{number} {title}"));
        let change = ChangeRequest {
            number,
            url: format!("https://example.test/pull/{number}"),
            branch: workspace.branch.clone(),
        };
        self.changes
            .lock()
            .unwrap()
            .insert(workspace.branch.clone(), change.clone());
        Ok(change)
    }

    async fn post_review(
        &self,
        change: &ChangeRequest,
        verdict: ReviewVerdict,
        _body: &str,
    ) -> Result<()> {
        self.log(format!("post_review #{} {}", change.number, verdict.as_str()));
        Ok(())
    }

    async fn merge_change(&self, change: &ChangeRequest, method: MergeMethod) -> Result<()> {
        if self.fail_merge {
            return Err(Error::Command(format!(
                "gh pr merge {} exited 1",
                change.number
            )));
        }
        self.log(format!("merge_change #{} {}", change.number, method.as_str()));
        self.merged_upstream.lock().unwrap().insert(change.number);
        Ok(())
    }

    async fn is_merged(&self, number: u64) -> Result<bool> {
        self.log(format!("is_merged #{number}"));
        Ok(self.merged_upstream.lock().unwrap().contains(&number))
    }

    async fn sync_base_branch(&self, base_branch: &str) -> Result<()> {
        self.log(format!("sync_base_branch {base_branch}"));
        Ok(())
    }
}

/// Tracker backed by a map of canned issues.
pub struct ScriptedTracker {
    issues: Mutex<HashMap<String, Issue>>,
    fetched: Mutex<Vec<String>>,
    comments: Mutex<Vec<String>>,
    native_plan: Option<EpicPlan>,
}

impl ScriptedTracker {
    pub fn new() -> Self {
        Self {
            issues: Mutex::new(HashMap::new()),
            fetched: Mutex::new(Vec::new()),
            comments: Mutex::new(Vec::new()),
            native_plan: None,
        }
    }

    pub fn with_issue(self, issue: Issue) -> Self {
        self.issues.lock().unwrap().insert(issue.id.clone(), issue);
        self
    }

    /// Make `epic_plan` return a tracker-native plan.
    pub fn with_native_plan(mut self, plan: EpicPlan) -> Self {
        self.native_plan = Some(plan);
        self
    }

    /// Issue ids fetched, in fetch order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn comments(&self) -> Vec<String> {
        self.comments.lock().unwrap().clone()
    }
}

impl Default for ScriptedTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tracker for ScriptedTracker {
    async fn fetch(&self, reference: &IssueRef) -> Result<Issue> {
        self.fetched.lock().unwrap().push(reference.id.clone());
        self.issues
            .lock()
            .unwrap()
            .get(&reference.id)
            .cloned()
            .ok_or_else(|| Error::TrackerCommunication {
                reference: reference.to_string(),
                reason: "no such issue".to_string(),
            })
    }

    async fn post_progress(&self, _issue: &Issue, body: &str) -> Result<()> {
        self.comments.lock().unwrap().push(body.to_string());
        Ok(())
    }

    async fn epic_plan(&self, _issue: &Issue) -> Result<Option<EpicPlan>> {
        Ok(self.native_plan.clone())
    }
}

/// A GitHub issue with enough flesh for prompts and reports.
pub fn gh_issue(id: &str, title: &str) -> Issue {
    let mut issue = Issue::new(TrackerKind::Github, id, title);
    issue.body = format!("{title}.");
    issue.url = format!("https://example.test/issues/{id}");
    issue
}

/// Everything an orchestrator run needs, wired to scripted fakes.
///
/// Fields are public so tests can swap the config or share a `ScriptedVcs`
/// between consecutive runs.
pub struct RunHarness {
    pub config: Arc<Config>,
    pub vcs: Arc<ScriptedVcs>,
    pub tracker: Arc<ScriptedTracker>,
    pub coder: Arc<ScriptedAgent>,
    pub reviewer: Arc<ScriptedAgent>,
    pub events: EventSender,
    pub cancel: CancellationToken,
}

impl RunHarness {
    pub fn new(
        coder: ScriptedAgent,
        reviewer: ScriptedAgent,
        vcs: ScriptedVcs,
        tracker: ScriptedTracker,
    ) -> Self {
        Self {
            config: Arc::new(Config::default()),
            vcs: Arc::new(vcs),
            tracker: Arc::new(tracker),
            coder: Arc::new(coder),
            reviewer: Arc::new(reviewer),
            events: EventSender::disabled(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.config.clone(),
            self.vcs.clone(),
            self.tracker.clone(),
            self.coder.clone(),
            self.reviewer.clone(),
            self.events.clone(),
            self.cancel.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_agent_replays_then_defaults() {
        let agent = ScriptedAgent::scripted("claude-code", &["first", "second"]);
        let out = agent
            .implement("p1", Path::new("/tmp"), None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out.output, "first");
        assert_eq!(out.session.as_deref(), Some("claude-code-session"));

        let out = agent
            .implement("p2", Path::new("/tmp"), None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out.output, "second");

        let out = agent
            .implement("p3", Path::new("/tmp"), None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out.output, "done");
        assert_eq!(agent.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_vcs_numbers_changes_in_order() {
        let vcs = ScriptedVcs::new();
        let first = vcs.create_workspace("1", "main").await.unwrap();
        let second = vcs.create_workspace("2", "main").await.unwrap();

        let a = vcs.create_change(&first, "one", "").await.unwrap();
        let b = vcs.create_change(&second, "two", "").await.unwrap();
        assert_eq!(a.number, 101);
        assert_eq!(b.number, 102);

        assert_eq!(vcs.find_change(&first.branch).await.unwrap(), Some(a));
        assert!(!vcs.is_merged(102).await.unwrap());
        vcs.mark_merged_upstream(102);
        assert!(vcs.is_merged(102).await.unwrap());
    }

    #[tokio::test]
    async fn test_scripted_tracker_fetch_and_miss() {
        let tracker = ScriptedTracker::new().with_issue(gh_issue("42", "Fix retries"));
        let reference = IssueRef {
            id: "42".to_string(),
            kind: TrackerKind::Github,
        };
        let issue = tracker.fetch(&reference).await.unwrap();
        assert_eq!(issue.title, "Fix retries");

        let missing = IssueRef {
            id: "43".to_string(),
            kind: TrackerKind::Github,
        };
        assert!(tracker.fetch(&missing).await.is_err());
        assert_eq!(tracker.fetched(), vec!["42", "43"]);
    }
}
