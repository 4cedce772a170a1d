//! Linear issue tracker, backed by its GraphQL API.
//!
//! Authentication is a personal API key sent as the raw `Authorization`
//! header value. Linear models epics natively (child issues plus blocking
//! relations), so this tracker can produce a dependency plan without any
//! issue-body conventions.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use super::Tracker;
use crate::epic::{topological_groups, EpicPlan};
use crate::issue::{Issue, IssueComment, IssueRef, TrackerKind};
use crate::{Error, Result};

const GRAPHQL_URL: &str = "https://api.linear.app/graphql";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const FETCH_ISSUE_QUERY: &str = r#"
query FetchIssue($identifier: String!) {
  issue(id: $identifier) {
    identifier
    title
    description
    url
    state { name }
    labels { nodes { name } }
    comments { nodes { user { name } body } }
  }
}
"#;

const FETCH_EPIC_PLAN_QUERY: &str = r#"
query FetchEpicPlan($identifier: String!) {
  issue(id: $identifier) {
    children {
      nodes {
        identifier
        relations {
          nodes {
            type
            relatedIssue { identifier }
          }
        }
      }
    }
  }
}
"#;

const GET_ISSUE_ID_QUERY: &str = r#"
query GetIssueId($identifier: String!) {
  issue(id: $identifier) {
    id
  }
}
"#;

const CREATE_COMMENT_MUTATION: &str = r#"
mutation CreateComment($issueId: String!, $body: String!) {
  commentCreate(input: { issueId: $issueId, body: $body }) {
    success
  }
}
"#;

pub struct LinearTracker {
    api_key: String,
    client: reqwest::Client,
}

impl LinearTracker {
    pub fn new(api_key: &str) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Validation(
                "LINEAR_API_KEY is not set; set the environment variable \
                 or linear_api_key in .gaffer.toml"
                    .to_string(),
            ));
        }
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            api_key: api_key.to_string(),
            client,
        })
    }

    async fn graphql(
        &self,
        reference: &str,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let payload = serde_json::json!({ "query": query, "variables": variables });
        let response = self
            .client
            .post(GRAPHQL_URL)
            .header("Authorization", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| tracker_err(reference, format!("request failed: {err}")))?
            .error_for_status()
            .map_err(|err| tracker_err(reference, err.to_string()))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| tracker_err(reference, format!("invalid response: {err}")))?;

        if let Some(errors) = body.get("errors") {
            return Err(tracker_err(reference, format!("GraphQL error: {errors}")));
        }
        body.get("data")
            .cloned()
            .ok_or_else(|| tracker_err(reference, "response missing data".to_string()))
    }

    /// Pull the `issue` object out of a GraphQL response, treating a JSON
    /// null as not-found.
    fn issue_value(reference: &str, data: &serde_json::Value) -> Result<serde_json::Value> {
        data.get("issue")
            .filter(|value| !value.is_null())
            .cloned()
            .ok_or_else(|| tracker_err(reference, "issue not found".to_string()))
    }
}

#[async_trait]
impl Tracker for LinearTracker {
    async fn fetch(&self, reference: &IssueRef) -> Result<Issue> {
        let data = self
            .graphql(
                &reference.id,
                FETCH_ISSUE_QUERY,
                serde_json::json!({ "identifier": reference.id }),
            )
            .await?;
        let issue: IssueNode = serde_json::from_value(Self::issue_value(&reference.id, &data)?)?;
        Ok(issue.into_issue())
    }

    async fn post_progress(&self, issue: &Issue, body: &str) -> Result<()> {
        // Comments are created against the internal UUID, not the identifier.
        let data = self
            .graphql(
                &issue.id,
                GET_ISSUE_ID_QUERY,
                serde_json::json!({ "identifier": issue.id }),
            )
            .await?;
        let issue_id = Self::issue_value(&issue.id, &data)?
            .get("id")
            .and_then(|value| value.as_str())
            .ok_or_else(|| tracker_err(&issue.id, "issue id missing".to_string()))?
            .to_string();

        self.graphql(
            &issue.id,
            CREATE_COMMENT_MUTATION,
            serde_json::json!({ "issueId": issue_id, "body": body }),
        )
        .await?;
        Ok(())
    }

    async fn epic_plan(&self, issue: &Issue) -> Result<Option<EpicPlan>> {
        let data = self
            .graphql(
                &issue.id,
                FETCH_EPIC_PLAN_QUERY,
                serde_json::json!({ "identifier": issue.id }),
            )
            .await?;
        let children: ChildrenNode =
            serde_json::from_value(Self::issue_value(&issue.id, &data)?)?;
        // No modeled children means no native plan; the caller falls back to
        // whatever the issue body describes.
        if children.children.nodes.is_empty() {
            return Ok(None);
        }
        Ok(Some(plan_from_children(&issue.id, children)?))
    }
}

fn tracker_err(reference: &str, reason: String) -> Error {
    Error::TrackerCommunication {
        reference: reference.to_string(),
        reason,
    }
}

/// Turn child issues plus their BLOCKS relations into ordered groups.
///
/// `a BLOCKS b` means `b` depends on `a`. Relations pointing outside the
/// child set are ignored; they order other teams' work, not this epic.
fn plan_from_children(parent: &str, data: ChildrenNode) -> Result<EpicPlan> {
    let child_set: BTreeSet<&str> = data
        .children
        .nodes
        .iter()
        .map(|node| node.identifier.as_str())
        .collect();

    let mut dependencies: BTreeMap<String, Vec<String>> = data
        .children
        .nodes
        .iter()
        .map(|node| (node.identifier.clone(), Vec::new()))
        .collect();

    for node in &data.children.nodes {
        for relation in &node.relations.nodes {
            if relation.kind != "BLOCKS" {
                continue;
            }
            let blocked = relation.related_issue.identifier.as_str();
            if child_set.contains(blocked) {
                if let Some(deps) = dependencies.get_mut(blocked) {
                    deps.push(node.identifier.clone());
                }
            }
        }
    }

    let groups = topological_groups(&dependencies)?;
    Ok(EpicPlan {
        parent: parent.to_string(),
        groups,
    })
}

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct IssueNode {
    identifier: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    state: Option<StateNode>,
    labels: Nodes<LabelNode>,
    comments: Nodes<CommentNode>,
}

#[derive(Debug, Deserialize)]
struct StateNode {
    name: String,
}

#[derive(Debug, Deserialize)]
struct LabelNode {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CommentNode {
    #[serde(default)]
    user: Option<UserNode>,
    body: String,
}

#[derive(Debug, Deserialize)]
struct UserNode {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ChildrenNode {
    children: Nodes<ChildNode>,
}

#[derive(Debug, Deserialize)]
struct ChildNode {
    identifier: String,
    relations: Nodes<RelationNode>,
}

#[derive(Debug, Deserialize)]
struct RelationNode {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "relatedIssue")]
    related_issue: RelatedIssueNode,
}

#[derive(Debug, Deserialize)]
struct RelatedIssueNode {
    identifier: String,
}

impl IssueNode {
    fn into_issue(self) -> Issue {
        let comments = self
            .comments
            .nodes
            .into_iter()
            .map(|comment| IssueComment {
                author: comment
                    .user
                    .map(|user| user.name)
                    .unwrap_or_else(|| "unknown".to_string()),
                body: comment.body,
            })
            .collect();

        Issue {
            id: self.identifier,
            kind: TrackerKind::Linear,
            title: self.title,
            body: self.description.unwrap_or_default(),
            url: self.url.unwrap_or_default(),
            labels: self.labels.nodes.into_iter().map(|label| label.name).collect(),
            comments,
            state: self.state.map(|state| state.name),
        }
    }
}
