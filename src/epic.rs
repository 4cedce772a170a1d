//! Epic detection and dependency resolution.
//!
//! An epic is a composite issue whose body references the child issues to run
//! as one coordinated batch. This module turns an epic body into an ordered
//! list of groups: everything inside a group may run concurrently, and a group
//! only starts once the previous group finished.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::issue::Issue;
use crate::{Error, Result};

/// Ordered execution plan extracted from an epic.
///
/// Group `k + 1` must not start before every member of group `k` reached a
/// terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpicPlan {
    /// Identifier of the epic issue itself.
    pub parent: String,
    /// Child issue identifiers, grouped by execution order.
    pub groups: Vec<Vec<String>>,
}

impl EpicPlan {
    pub fn total_tasks(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

fn ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#(\d+)|\b([A-Z]+-\d+)\b").expect("valid regex"))
}

fn ordering_section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)###?\s+Suggested\s+Implementation\s+Order\s*\n(.*?)(?:\n##|\z)")
            .expect("valid regex")
    })
}

fn numbered_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+[.)]\s+").expect("valid regex"))
}

fn dash_separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+[—–-]{1,2}\s+").expect("valid regex"))
}

/// Pull all issue references out of `text`, in order of appearance.
///
/// Matches both `#123` (GitHub) and `ABC-123` (Linear) forms; the returned
/// identifiers are bare, without the `#`.
fn extract_refs(text: &str) -> Vec<String> {
    ref_re()
        .captures_iter(text)
        .filter_map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

/// Whether this issue should be treated as an epic.
///
/// True when a label starts with `epic:` or the body references more than one
/// other issue.
pub fn is_epic(issue: &Issue) -> bool {
    if issue.labels.iter().any(|l| l.starts_with("epic:")) {
        return true;
    }
    extract_refs(&issue.body).len() > 1
}

/// Resolve an epic body into an ordered execution plan.
///
/// Tries three parsing strategies in order and uses the first that applies
/// (they are never merged):
/// 1. a `Suggested Implementation Order` numbered list, one group per line
/// 2. a markdown table with a `Depends on` column, topologically grouped
/// 3. every referenced issue as its own sequential group
///
/// # Errors
///
/// Fails when the dependency table contains a cycle or names a dependency
/// that is not itself part of the epic, or when the body references the
/// epic's own identifier.
pub fn resolve(issue: &Issue) -> Result<EpicPlan> {
    let body = &issue.body;

    let mut groups = match parse_ordering_section(body) {
        Some(groups) => groups,
        None => match parse_dependency_table(body)? {
            Some(groups) => groups,
            None => extract_refs(body).into_iter().map(|r| vec![r]).collect(),
        },
    };

    // First occurrence wins; later duplicates are dropped wherever they appear.
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for group in &mut groups {
        group.retain(|r| seen.insert(r.clone()));
    }
    groups.retain(|g| !g.is_empty());

    if groups.iter().flatten().any(|r| *r == issue.id) {
        return Err(Error::DependencyResolution(format!(
            "epic {} references itself as a child",
            issue.display_id()
        )));
    }

    Ok(EpicPlan {
        parent: issue.id.clone(),
        groups,
    })
}

/// Strategy 1: numbered `Suggested Implementation Order` list.
///
/// Each numbered line becomes one group. References are only taken from the
/// portion of the line before a dash separator, so issues mentioned in prose
/// descriptions do not leak into the plan.
fn parse_ordering_section(body: &str) -> Option<Vec<Vec<String>>> {
    let section = ordering_section_re()
        .captures(body)?
        .get(1)?
        .as_str()
        .to_string();

    let mut groups = Vec::new();
    for line in section.lines() {
        let line = line.trim();
        if !numbered_line_re().is_match(line) {
            continue;
        }
        let header = dash_separator_re()
            .splitn(line, 2)
            .next()
            .unwrap_or(line)
            .to_string();
        let refs = extract_refs(&header);
        if !refs.is_empty() {
            groups.push(refs);
        }
    }

    if groups.is_empty() {
        None
    } else {
        Some(groups)
    }
}

/// Strategy 2: markdown table with a `Depends on` column.
fn parse_dependency_table(body: &str) -> Result<Option<Vec<Vec<String>>>> {
    let lines: Vec<&str> = body.lines().collect();

    let mut header_idx = None;
    let mut dep_col = None;
    let mut issue_col = None;
    for (i, line) in lines.iter().enumerate() {
        if !line.contains('|') || !line.to_lowercase().contains("depends on") {
            continue;
        }
        let cols: Vec<String> = line
            .split('|')
            .map(|c| c.trim().to_lowercase())
            .collect();
        dep_col = cols.iter().position(|c| c.contains("depends on"));
        issue_col = cols
            .iter()
            .position(|c| matches!(c.as_str(), "#" | "issue" | "#issue" | "issue #"));
        if dep_col.is_some() {
            header_idx = Some(i);
            // Default: the first data column.
            if issue_col.is_none() {
                issue_col = Some(1);
            }
            break;
        }
    }

    let (Some(header_idx), Some(dep_col), Some(issue_col)) = (header_idx, dep_col, issue_col)
    else {
        return Ok(None);
    };

    let mut dependencies: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in lines.iter().skip(header_idx + 2) {
        if !line.trim_start().starts_with('|') {
            break;
        }
        let cols: Vec<String> = line.split('|').map(|c| c.trim().to_string()).collect();
        if cols.len() <= issue_col.max(dep_col) {
            continue;
        }

        let refs = extract_refs(&cols[issue_col]);
        let Some(id) = refs.into_iter().next() else {
            continue;
        };

        let dep_cell = cols[dep_col].as_str();
        let deps = if matches!(dep_cell, "—" | "-" | "") {
            Vec::new()
        } else {
            extract_refs(dep_cell)
        };
        dependencies.insert(id, deps);
    }

    if dependencies.is_empty() {
        return Ok(None);
    }
    topological_groups(&dependencies).map(Some)
}

/// Layer a dependency map into sequential groups via Kahn's algorithm.
///
/// Group 0 holds every issue with no dependencies; group `k` holds the issues
/// whose dependencies all sit in earlier groups. Members of each group are
/// sorted for deterministic output.
///
/// # Errors
///
/// Fails on a dependency that is not itself a key of the map, on a
/// self-dependency, and on cycles. Nothing is silently dropped.
pub(crate) fn topological_groups(
    dependencies: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<Vec<String>>> {
    for (id, deps) in dependencies {
        for dep in deps {
            if dep == id {
                return Err(Error::DependencyResolution(format!(
                    "{id} depends on itself"
                )));
            }
            if !dependencies.contains_key(dep) {
                return Err(Error::DependencyResolution(format!(
                    "{id} depends on {dep}, which is not part of the epic"
                )));
            }
        }
    }

    let mut placed: BTreeSet<&str> = BTreeSet::new();
    let mut remaining: BTreeSet<&str> = dependencies.keys().map(String::as_str).collect();
    let mut groups = Vec::new();

    while !remaining.is_empty() {
        let mut ready: Vec<&str> = remaining
            .iter()
            .filter(|id| {
                dependencies[**id]
                    .iter()
                    .all(|d| placed.contains(d.as_str()))
            })
            .copied()
            .collect();
        if ready.is_empty() {
            let mut stuck: Vec<&str> = remaining.iter().copied().collect();
            stuck.sort_by(ref_order);
            return Err(Error::DependencyResolution(format!(
                "dependency cycle among {}",
                stuck.join(", ")
            )));
        }
        ready.sort_by(ref_order);
        for id in &ready {
            remaining.remove(*id);
            placed.insert(*id);
        }
        groups.push(ready.into_iter().map(String::from).collect());
    }

    Ok(groups)
}

/// Order references numerically when both are plain numbers, else as strings.
fn ref_order(a: &&str, b: &&str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}
