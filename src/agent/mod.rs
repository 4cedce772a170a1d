//! Coding-agent backends.
//!
//! A pipeline drives two agent roles, a coder and a reviewer, over the same
//! capability surface: run a prompt inside a workspace, optionally resuming a
//! prior session. `Agent` is that seam. Concrete backends shell out to the
//! `claude` or `codex` CLI in headless mode and scrape the streamed JSON
//! events they emit.

mod claude;
mod codex;

pub use claude::ClaudeCodeAgent;
pub use codex::CodexAgent;

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use crate::config::AgentBackend;
use crate::prompts::build_feedback_prompt;
use crate::{glog_debug, Error, Result};

/// Default per-call timeout (10 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// What a finished agent call produced.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Final assistant text. For a reviewer call this carries the verdict JSON.
    pub output: String,
    /// Session handle for follow-up calls, when the backend reported one.
    pub session: Option<String>,
}

/// A headless coding agent.
///
/// Invocation failures (missing binary, timeout, nonzero exit) are errors; a
/// successful call always yields the agent's final text output.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Backend name as spelled in configuration.
    fn name(&self) -> &'static str;

    /// Run `prompt` inside `workspace`, resuming `session` when given.
    async fn implement(
        &self,
        prompt: &str,
        workspace: &Path,
        session: Option<&str>,
        timeout: Duration,
    ) -> Result<AgentOutcome>;

    /// Address review findings in the same workspace.
    ///
    /// The default resumes the prior session with the feedback wrapped in the
    /// fix-up prompt; backends with different session semantics override it.
    async fn apply_feedback(
        &self,
        feedback: &str,
        workspace: &Path,
        session: Option<&str>,
        timeout: Duration,
    ) -> Result<AgentOutcome> {
        let prompt = build_feedback_prompt(feedback);
        self.implement(&prompt, workspace, session, timeout).await
    }
}

/// Construct the coder-role agent for `backend`.
///
/// Fails when the backing CLI is not on PATH, so a missing binary surfaces
/// before any workspace is created.
pub fn coder_agent(
    backend: AgentBackend,
    model: &str,
    skip_permissions: bool,
) -> Result<Box<dyn Agent>> {
    match backend {
        AgentBackend::ClaudeCode => Ok(Box::new(ClaudeCodeAgent::new(model, skip_permissions)?)),
        AgentBackend::Codex => Ok(Box::new(CodexAgent::new(model)?)),
    }
}

/// Construct the reviewer-role agent for `backend`.
///
/// The reviewer runs with `gh` shadowed off its PATH: it judges the change
/// but never talks to the forge itself. Publishing the verdict is the
/// pipeline's job.
pub fn reviewer_agent(
    backend: AgentBackend,
    model: &str,
    skip_permissions: bool,
) -> Result<Box<dyn Agent>> {
    match backend {
        AgentBackend::ClaudeCode => Ok(Box::new(
            ClaudeCodeAgent::new(model, skip_permissions)?.without_gh(),
        )),
        AgentBackend::Codex => Ok(Box::new(CodexAgent::new(model)?.without_gh())),
    }
}

/// Captured output of one agent CLI invocation.
#[derive(Debug)]
pub(crate) struct Invocation {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Invocation {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Run an agent CLI to completion under `timeout`.
///
/// The child is killed if the timeout fires. With `shadow_gh` the process
/// sees a PATH where `gh` resolves to a stub that exits 127.
pub(crate) async fn run_to_completion(
    binary: &Path,
    args: &[String],
    workspace: &Path,
    shadow_gh: bool,
    timeout: Duration,
) -> Result<Invocation> {
    let mut command = Command::new(binary);
    command.args(args).current_dir(workspace).kill_on_drop(true);
    if shadow_gh {
        if let Some(path) = gh_shadowed_path() {
            command.env("PATH", path);
        }
    }
    glog_debug!(
        "agent exec {} ({} args) in {}",
        binary.display(),
        args.len(),
        workspace.display()
    );

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| Error::AgentTimeout(timeout))?
        .map_err(Error::Io)?;

    Ok(Invocation {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Build a PATH with a stub `gh` ahead of the real one.
///
/// Returns `None` when `gh` is not installed (nothing to shadow) or the stub
/// cannot be written; the caller then runs with the ambient PATH.
fn gh_shadowed_path() -> Option<OsString> {
    which::which("gh").ok()?;

    let stub_dir = std::env::temp_dir().join("gaffer-no-gh");
    std::fs::create_dir_all(&stub_dir).ok()?;
    let stub = stub_dir.join("gh");
    std::fs::write(&stub, "#!/bin/sh\necho 'gh: disabled by gaffer' >&2\nexit 127\n").ok()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).ok()?;
    }

    let mut paths = vec![stub_dir];
    paths.extend(std::env::split_paths(
        &std::env::var_os("PATH").unwrap_or_default(),
    ));
    std::env::join_paths(paths).ok()
}
