//! GitHub issue tracker, backed by the `gh` CLI.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::Tracker;
use crate::issue::{Issue, IssueComment, IssueRef, TrackerKind};
use crate::{glog_debug, Error, Result};

#[derive(Debug, Default)]
pub struct GithubTracker;

impl GithubTracker {
    pub fn new() -> Self {
        Self
    }

    async fn run_gh(&self, args: &[&str]) -> Result<String> {
        glog_debug!("gh {}", args.join(" "));
        let output = Command::new("gh").args(args).output().await.map_err(|err| {
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
}

#[async_trait]
impl Tracker for GithubTracker {
    async fn fetch(&self, reference: &IssueRef) -> Result<Issue> {
        let raw = self
            .run_gh(&[
                "issue",
                "view",
                &reference.id,
                "--json",
                "number,title,body,labels,url,comments",
            ])
            .await
            .map_err(|err| Error::TrackerCommunication {
                reference: reference.to_string(),
                reason: err.to_string(),
            })?;
        let data: RawIssue = serde_json::from_str(&raw)?;
        Ok(data.into_issue())
    }

    /// Nothing to post: progress lands on the change request itself, and the
    /// merge closes the issue through its `Closes #N` reference.
    async fn post_progress(&self, _issue: &Issue, _body: &str) -> Result<()> {
        Ok(())
    }
}

/// `gh issue view --json` shape.
#[derive(Debug, Deserialize)]
struct RawIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<RawLabel>,
    #[serde(default)]
    url: String,
    #[serde(default)]
    comments: Vec<RawComment>,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    #[serde(default)]
    author: Option<RawAuthor>,
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    login: String,
}

impl RawIssue {
    fn into_issue(self) -> Issue {
        let comments = self
            .comments
            .into_iter()
            .filter(|comment| !comment.body.trim().is_empty())
            .map(|comment| IssueComment {
                author: comment
                    .author
                    .map(|author| author.login)
                    .unwrap_or_else(|| "unknown".to_string()),
                body: comment.body.trim().to_string(),
            })
            .collect();

        Issue {
            id: self.number.to_string(),
            kind: TrackerKind::Github,
            title: self.title,
            body: self.body.unwrap_or_default(),
            url: self.url,
            labels: self.labels.into_iter().map(|label| label.name).collect(),
            comments,
            state: None,
        }
    }
}
