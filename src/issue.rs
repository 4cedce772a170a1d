//! Issue data model: the unit of work a pipeline implements.
//!
//! Issues are immutable once fetched. The tracker kind is derived from the
//! shape of the reference the caller supplied: plain numbers are GitHub
//! issues, `ABC-123` identifiers are Linear issues.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::{Error, Result};

/// Which tracker an issue came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerKind {
    Github,
    Linear,
}

impl TrackerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerKind::Github => "github",
            TrackerKind::Linear => "linear",
        }
    }
}

impl std::fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed issue reference: the raw identifier plus the tracker it routes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueRef {
    pub id: String,
    pub kind: TrackerKind,
}

impl IssueRef {
    pub fn github(number: u64) -> Self {
        Self {
            id: number.to_string(),
            kind: TrackerKind::Github,
        }
    }

    pub fn linear(identifier: impl Into<String>) -> Self {
        Self {
            id: identifier.into(),
            kind: TrackerKind::Linear,
        }
    }
}

impl std::fmt::Display for IssueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TrackerKind::Github => write!(f, "#{}", self.id),
            TrackerKind::Linear => write!(f, "{}", self.id),
        }
    }
}

fn linear_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z]+-\d+$").expect("valid regex"))
}

/// Parse one issue reference token.
///
/// # Errors
///
/// Returns a validation error when the token is neither a GitHub issue
/// number (`123`) nor a Linear identifier (`ENG-123`).
pub fn parse_issue_ref(token: &str) -> Result<IssueRef> {
    let token = token.trim();
    if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
        return Ok(IssueRef {
            id: token.to_string(),
            kind: TrackerKind::Github,
        });
    }
    if linear_id_re().is_match(token) {
        return Ok(IssueRef {
            id: token.to_string(),
            kind: TrackerKind::Linear,
        });
    }
    Err(Error::Validation(format!(
        "invalid issue reference '{token}' (expected an issue number like 123 or a Linear ID like ENG-123)"
    )))
}

/// Parse a comma-separated list of issue references.
///
/// All references in one batch must route to the same tracker; mixing
/// GitHub and Linear references is rejected before any work starts.
pub fn parse_issue_refs(input: &str) -> Result<Vec<IssueRef>> {
    let mut refs = Vec::new();
    for token in input.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        refs.push(parse_issue_ref(token)?);
    }
    if refs.is_empty() {
        return Err(Error::Validation(
            "no issue references provided".to_string(),
        ));
    }
    let kind = refs[0].kind;
    if refs.iter().any(|r| r.kind != kind) {
        return Err(Error::Validation(
            "cannot mix GitHub and Linear issues in a single batch; run them separately"
                .to_string(),
        ));
    }
    Ok(refs)
}

/// A comment on an issue, kept in thread order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueComment {
    pub author: String,
    pub body: String,
}

/// One unit of work to implement.
///
/// Immutable after fetch. Owned by the pipeline processing it; the
/// orchestrator only ever reads the identifier for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Tracker-native identifier: `"123"` for GitHub, `"ENG-123"` for Linear.
    pub id: String,
    pub kind: TrackerKind,
    pub title: String,
    pub body: String,
    pub url: String,
    pub labels: Vec<String>,
    pub comments: Vec<IssueComment>,
    /// Workflow state name, where the tracker has one (Linear).
    pub state: Option<String>,
}

impl Issue {
    pub fn new(kind: TrackerKind, id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            body: String::new(),
            url: String::new(),
            labels: Vec::new(),
            comments: Vec::new(),
            state: None,
        }
    }

    /// Filesystem- and branch-safe identifier for this issue.
    pub fn slug(&self) -> &str {
        &self.id
    }

    /// Short human-readable identifier (`#123` or `ENG-123`).
    pub fn display_id(&self) -> String {
        IssueRef {
            id: self.id.clone(),
            kind: self.kind,
        }
        .to_string()
    }

    pub fn issue_ref(&self) -> IssueRef {
        IssueRef {
            id: self.id.clone(),
            kind: self.kind,
        }
    }

    /// Render the issue as prompt text for the coder agent.
    pub fn to_prompt(&self) -> String {
        let mut out = match self.kind {
            TrackerKind::Github => format!("GitHub Issue #{}: {}\n", self.id, self.title),
            TrackerKind::Linear => format!("Linear Issue {}: {}\n", self.id, self.title),
        };
        out.push_str(&format!("URL: {}\n", self.url));
        if let Some(state) = &self.state {
            if !state.is_empty() {
                out.push_str(&format!("State: {state}\n"));
            }
        }
        if !self.labels.is_empty() {
            out.push_str(&format!("Labels: {}\n", self.labels.join(", ")));
        }
        out.push('\n');
        out.push_str(&self.body);
        if !self.comments.is_empty() {
            let formatted: Vec<String> = self
                .comments
                .iter()
                .map(|c| format!("**{}:**\n{}", c.author, c.body))
                .collect();
            out.push_str("\n\n---\n\n### Comments\n\n");
            out.push_str(&formatted.join("\n\n"));
        }
        out
    }
}
