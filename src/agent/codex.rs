//! OpenAI Codex CLI backend.
//!
//! Runs `codex exec --json` and folds the JSONL event stream down to the
//! thread id, the last agent message, and the first reported error.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{run_to_completion, Agent, AgentOutcome};
use crate::prompts::build_feedback_prompt;
use crate::{Error, Result};

/// Coder agent backed by the OpenAI Codex CLI.
pub struct CodexAgent {
    binary: PathBuf,
    model: String,
    shadow_gh: bool,
}

impl CodexAgent {
    /// Locate the `codex` binary on PATH and build an agent around it.
    pub fn new(model: &str) -> Result<Self> {
        let binary =
            which::which("codex").map_err(|_| Error::AgentNotAvailable("codex".to_string()))?;
        Ok(Self::with_binary(binary, model))
    }

    /// Build against an explicit binary path.
    pub fn with_binary(binary: PathBuf, model: &str) -> Self {
        Self {
            binary,
            model: model.to_string(),
            shadow_gh: false,
        }
    }

    /// Shadow `gh` off the agent's PATH for reviewer-role runs.
    pub fn without_gh(mut self) -> Self {
        self.shadow_gh = true;
        self
    }

    /// Fresh-session arguments.
    ///
    /// A linked worktree keeps its real git dir under the main repository's
    /// `.git/worktrees/`, outside the sandbox, so that directory has to be
    /// granted explicitly or commits fail.
    fn fresh_args(&self, prompt: &str, workspace: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "exec".to_string(),
            "--full-auto".to_string(),
            "--json".to_string(),
        ];
        if !self.model.is_empty() {
            args.push("--model".to_string());
            args.push(self.model.clone());
        }
        if let Some(git_dir) = main_git_dir(workspace) {
            args.push("--add-dir".to_string());
            args.push(git_dir.display().to_string());
        }
        args.push(prompt.to_string());
        args
    }

    fn resume_args(&self, prompt: &str, session: &str) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "exec".to_string(),
            "resume".to_string(),
            "--full-auto".to_string(),
            "--json".to_string(),
        ];
        if !self.model.is_empty() {
            args.push("--model".to_string());
            args.push(self.model.clone());
        }
        args.push(session.to_string());
        args.push(prompt.to_string());
        args
    }

    async fn run(
        &self,
        args: Vec<String>,
        workspace: &Path,
        timeout: Duration,
    ) -> Result<AgentOutcome> {
        let run = run_to_completion(&self.binary, &args, workspace, self.shadow_gh, timeout).await?;
        let events = parse_events(&run.stdout);
        let output = if events.last_message.is_empty() {
            run.stdout.clone()
        } else {
            events.last_message.clone()
        };

        if !run.success() {
            let mut message = events.error;
            if message.is_empty() {
                message = run.stderr.trim().to_string();
            }
            if message.is_empty() {
                message = if events.last_message.is_empty() {
                    format!(
                        "codex exited with code {} with no output. \
                         Check that `codex` is installed and OPENAI_API_KEY is set.",
                        run.code
                    )
                } else {
                    let tail: String = events.last_message.chars().take(200).collect();
                    format!("codex exited with code {} (last message: {tail})", run.code)
                };
            }
            return Err(Error::AgentInvocation(message));
        }

        Ok(AgentOutcome {
            output,
            session: events.thread,
        })
    }
}

#[async_trait]
impl Agent for CodexAgent {
    fn name(&self) -> &'static str {
        "codex"
    }

    async fn implement(
        &self,
        prompt: &str,
        workspace: &Path,
        session: Option<&str>,
        timeout: Duration,
    ) -> Result<AgentOutcome> {
        let args = match session {
            Some(sid) => self.resume_args(prompt, sid),
            None => self.fresh_args(prompt, workspace),
        };
        self.run(args, workspace, timeout).await
    }

    /// Always a fresh session: `codex exec resume` cannot re-grant the main
    /// git dir with `--add-dir`, and the feedback prompt is self-contained.
    async fn apply_feedback(
        &self,
        feedback: &str,
        workspace: &Path,
        _session: Option<&str>,
        timeout: Duration,
    ) -> Result<AgentOutcome> {
        let args = self.fresh_args(&build_feedback_prompt(feedback), workspace);
        self.run(args, workspace, timeout).await
    }
}

/// What the JSONL event stream reported.
#[derive(Debug, Default)]
pub(crate) struct CodexEvents {
    pub thread: Option<String>,
    pub last_message: String,
    pub error: String,
}

pub(crate) fn parse_events(stdout: &str) -> CodexEvents {
    let mut events = CodexEvents::default();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        match event.get("type").and_then(|v| v.as_str()).unwrap_or_default() {
            "thread.started" => {
                events.thread = event
                    .get("thread_id")
                    .and_then(|v| v.as_str())
                    .map(String::from);
            }
            "error" => {
                events.error = event
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
            }
            "turn.failed" => {
                if events.error.is_empty() {
                    events.error = event
                        .get("error")
                        .and_then(|e| e.get("message"))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                }
            }
            "item.completed" => {
                let item = event.get("item");
                if item.and_then(|i| i.get("type")).and_then(|v| v.as_str())
                    == Some("agent_message")
                {
                    events.last_message = item
                        .and_then(|i| i.get("text"))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                }
            }
            _ => {}
        }
    }
    events
}

/// Resolve the main repository's `.git` directory from a linked worktree.
///
/// A worktree's `.git` is a file containing `gitdir: <main>/.git/worktrees/<name>`;
/// two levels up is the main `.git` directory. Returns `None` for a normal
/// checkout, where no extra grant is needed.
fn main_git_dir(workspace: &Path) -> Option<PathBuf> {
    let git_file = workspace.join(".git");
    if !git_file.is_file() {
        return None;
    }
    let content = std::fs::read_to_string(&git_file).ok()?;
    let gitdir = content.trim().strip_prefix("gitdir:")?.trim();
    let mut git_dir = PathBuf::from(gitdir);
    if git_dir.is_relative() {
        let joined = workspace.join(&git_dir);
        git_dir = std::fs::canonicalize(&joined).unwrap_or(joined);
    }
    Some(git_dir.parent()?.parent()?.to_path_buf())
}
