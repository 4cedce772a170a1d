//! Run configuration: `.gaffer.toml` discovery, env overrides, CLI overlay.
//!
//! Precedence is file < `GAFFER_*` environment < CLI flags. The merged value
//! is threaded explicitly into the orchestrator and pipelines; nothing reads
//! configuration ambiently after startup.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::{glog_debug, Error, Result};

const CONFIG_FILENAME: &str = ".gaffer.toml";

/// Which CLI backend drives an agent role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AgentBackend {
    #[default]
    ClaudeCode,
    Codex,
}

impl AgentBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentBackend::ClaudeCode => "claude-code",
            AgentBackend::Codex => "codex",
        }
    }
}

impl fmt::Display for AgentBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AgentBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "claude-code" => Ok(AgentBackend::ClaudeCode),
            "codex" => Ok(AgentBackend::Codex),
            other => Err(Error::Validation(format!(
                "unknown agent backend '{other}' (expected claude-code or codex)"
            ))),
        }
    }
}

/// Full review loop, or stop after the first successful implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IterationMode {
    #[default]
    Full,
    SinglePass,
}

impl IterationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IterationMode::Full => "full",
            IterationMode::SinglePass => "single-pass",
        }
    }
}

impl fmt::Display for IterationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IterationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(IterationMode::Full),
            "single-pass" => Ok(IterationMode::SinglePass),
            other => Err(Error::Validation(format!(
                "unknown iteration mode '{other}' (expected full or single-pass)"
            ))),
        }
    }
}

/// What happens after a pipeline's change is approved.
///
/// `Auto` merges the change itself, `Wait` polls until someone else merges,
/// `Skip` leaves the change open and moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    Auto,
    Wait,
    #[default]
    Skip,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Auto => "auto",
            MergeStrategy::Wait => "wait",
            MergeStrategy::Skip => "skip",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(MergeStrategy::Auto),
            "wait" => Ok(MergeStrategy::Wait),
            "skip" => Ok(MergeStrategy::Skip),
            other => Err(Error::Validation(format!(
                "unknown merge strategy '{other}' (expected auto, wait, or skip)"
            ))),
        }
    }
}

/// How an auto-merged change lands on the base branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MergeMethod {
    #[default]
    Squash,
    Merge,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMethod::Squash => "squash",
            MergeMethod::Merge => "merge",
            MergeMethod::Rebase => "rebase",
        }
    }
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MergeMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "squash" => Ok(MergeMethod::Squash),
            "merge" => Ok(MergeMethod::Merge),
            "rebase" => Ok(MergeMethod::Rebase),
            other => Err(Error::Validation(format!(
                "unknown merge method '{other}' (expected squash, merge, or rebase)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub coder_backend: AgentBackend,
    pub reviewer_backend: AgentBackend,
    pub max_review_rounds: u32,
    pub iteration_mode: IterationMode,
    pub parallel_workers: usize,
    pub base_branch: String,
    pub agent_timeout: u64,
    pub coder_model: String,
    pub reviewer_model: String,
    pub sequential: bool,
    pub merge_method: MergeMethod,
    pub merge_strategy: MergeStrategy,
    pub post_progress: bool,
    pub linear_api_key: String,
    pub skip_permissions: bool,
    pub clean: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coder_backend: AgentBackend::ClaudeCode,
            reviewer_backend: AgentBackend::ClaudeCode,
            max_review_rounds: 4,
            iteration_mode: IterationMode::Full,
            parallel_workers: 2,
            base_branch: "main".to_string(),
            agent_timeout: 600,
            coder_model: String::new(),
            reviewer_model: String::new(),
            sequential: true,
            merge_method: MergeMethod::Squash,
            merge_strategy: MergeStrategy::Skip,
            post_progress: true,
            linear_api_key: String::new(),
            skip_permissions: true,
            clean: false,
        }
    }
}

/// On-disk shape: settings live under a `[gaffer]` table so the file can
/// coexist with other tool tables in the same repo.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    gaffer: Config,
}

impl Config {
    /// Per-agent-call timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout)
    }

    /// Walk up from `start` looking for a `.gaffer.toml`.
    pub fn discover_file(start: &Path) -> Option<PathBuf> {
        let mut dir = Some(start);
        while let Some(d) = dir {
            let candidate = d.join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            dir = d.parent();
        }
        None
    }

    /// Load config from the nearest `.gaffer.toml` (if any), then apply
    /// `GAFFER_*` environment overrides. CLI flags are overlaid by the caller.
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let mut config = match Self::discover_file(&cwd) {
            Some(path) => {
                glog_debug!("Config::load path={}", path.display());
                let file: ConfigFile = toml::from_str(&fs::read_to_string(&path)?)?;
                file.gaffer
            }
            None => {
                glog_debug!("No {CONFIG_FILENAME} found, using defaults");
                Self::default()
            }
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Parse a config from TOML text (`[gaffer]` table).
    pub fn from_toml(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        Ok(file.gaffer)
    }

    /// Render the effective config as a `[gaffer]` TOML table.
    pub fn to_toml_string(&self) -> Result<String> {
        let file = ConfigFile {
            gaffer: self.clone(),
        };
        Ok(toml::to_string_pretty(&file)?)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("GAFFER_BACKEND") {
            self.coder_backend = v.parse()?;
        }
        if let Ok(v) = std::env::var("GAFFER_REVIEWER_BACKEND") {
            self.reviewer_backend = v.parse()?;
        }
        if let Ok(v) = std::env::var("GAFFER_MAX_ROUNDS") {
            self.max_review_rounds = parse_env_int("GAFFER_MAX_ROUNDS", &v)? as u32;
        }
        if let Ok(v) = std::env::var("GAFFER_ITERATION_MODE") {
            self.iteration_mode = v.parse()?;
        }
        if let Ok(v) = std::env::var("GAFFER_PARALLEL") {
            self.parallel_workers = parse_env_int("GAFFER_PARALLEL", &v)? as usize;
        }
        if let Ok(v) = std::env::var("GAFFER_BASE_BRANCH") {
            self.base_branch = v;
        }
        if let Ok(v) = std::env::var("GAFFER_AGENT_TIMEOUT") {
            self.agent_timeout = parse_env_int("GAFFER_AGENT_TIMEOUT", &v)?;
        }
        if let Ok(v) = std::env::var("GAFFER_CODER_MODEL") {
            self.coder_model = v;
        }
        if let Ok(v) = std::env::var("GAFFER_REVIEWER_MODEL") {
            self.reviewer_model = v;
        }
        if let Ok(v) = std::env::var("LINEAR_API_KEY") {
            self.linear_api_key = v;
        }
        Ok(())
    }
}

fn parse_env_int(name: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::Validation(format!("{name} must be an integer, got '{value}'")))
}
