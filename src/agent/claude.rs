//! Claude Code CLI backend.
//!
//! Runs `claude -p --output-format stream-json` and scrapes the final
//! `result` event out of the JSONL transcript for the output text and the
//! session id used to resume follow-up rounds.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{run_to_completion, Agent, AgentOutcome};
use crate::{Error, Result};

/// Coder agent backed by the Claude Code CLI.
pub struct ClaudeCodeAgent {
    binary: PathBuf,
    model: String,
    skip_permissions: bool,
    shadow_gh: bool,
}

impl ClaudeCodeAgent {
    /// Locate the `claude` binary on PATH and build an agent around it.
    pub fn new(model: &str, skip_permissions: bool) -> Result<Self> {
        let binary =
            which::which("claude").map_err(|_| Error::AgentNotAvailable("claude".to_string()))?;
        Ok(Self::with_binary(binary, model, skip_permissions))
    }

    /// Build against an explicit binary path.
    pub fn with_binary(binary: PathBuf, model: &str, skip_permissions: bool) -> Self {
        Self {
            binary,
            model: model.to_string(),
            skip_permissions,
            shadow_gh: false,
        }
    }

    /// Shadow `gh` off the agent's PATH for reviewer-role runs.
    pub fn without_gh(mut self) -> Self {
        self.shadow_gh = true;
        self
    }

    fn build_args(&self, prompt: &str, session: Option<&str>) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-p".to_string(),
            "--verbose".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
        ];
        if self.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        if !self.model.is_empty() {
            args.push("--model".to_string());
            args.push(self.model.clone());
        }
        if let Some(sid) = session {
            args.push("--resume".to_string());
            args.push(sid.to_string());
        }
        args.push(prompt.to_string());
        args
    }
}

#[async_trait]
impl Agent for ClaudeCodeAgent {
    fn name(&self) -> &'static str {
        "claude-code"
    }

    async fn implement(
        &self,
        prompt: &str,
        workspace: &Path,
        session: Option<&str>,
        timeout: Duration,
    ) -> Result<AgentOutcome> {
        let args = self.build_args(prompt, session);
        let run = run_to_completion(&self.binary, &args, workspace, self.shadow_gh, timeout).await?;
        let parsed = parse_stream(&run.stdout);

        if !run.success() {
            let mut message = run.stderr.trim().to_string();
            if message.is_empty() {
                message = format!("claude exited with code {}", run.code);
                if !parsed.output.is_empty() {
                    let tail: String = parsed.output.chars().take(200).collect();
                    message.push_str(&format!(" (last output: {tail})"));
                }
            }
            return Err(Error::AgentInvocation(message));
        }

        Ok(AgentOutcome {
            output: parsed.output,
            // A resumed run may omit the session id; keep the one we resumed.
            session: parsed.session.or_else(|| session.map(String::from)),
        })
    }
}

/// Output text and session id pulled from a `stream-json` transcript.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct StreamResult {
    pub session: Option<String>,
    pub output: String,
}

/// The transcript is JSONL; the final `result` event carries the session id
/// and the assistant's closing text. Absent that, fall back to treating the
/// whole stdout as one JSON object, then to the raw text.
pub(crate) fn parse_stream(stdout: &str) -> StreamResult {
    let mut session: Option<String> = None;
    let mut output: Option<String> = None;

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if event.get("type").and_then(|v| v.as_str()) == Some("result") {
            session = event
                .get("session_id")
                .and_then(|v| v.as_str())
                .map(String::from);
            output = Some(
                event
                    .get("result")
                    .and_then(|v| v.as_str())
                    .unwrap_or(line)
                    .to_string(),
            );
        }
    }

    if output.is_none() {
        if let Ok(serde_json::Value::Object(data)) = serde_json::from_str(stdout) {
            session = data
                .get("session_id")
                .and_then(|v| v.as_str())
                .map(String::from);
            output = Some(
                data.get("result")
                    .and_then(|v| v.as_str())
                    .unwrap_or(stdout)
                    .to_string(),
            );
        }
    }

    StreamResult {
        session,
        output: output.unwrap_or_else(|| stdout.trim().to_string()),
    }
}
