//! Review verdicts and reviewer output parsing.
//!
//! Reviewer agents are told to answer with a single JSON object, but the
//! output arrives wrapped in JSONL event streams, markdown fences, or prose
//! more often than not. The parser here digs the object out of whatever
//! arrived. When nothing parseable is found the review fails closed: the
//! verdict becomes changes-requested, never approval.

use serde::{Deserialize, Serialize};

use crate::glog_warn;
use crate::{Error, Result};

/// Outcome of one review round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewVerdict {
    Approved,
    ChangesRequested,
}

impl ReviewVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewVerdict::Approved => "approved",
            ReviewVerdict::ChangesRequested => "changes-requested",
        }
    }
}

impl std::fmt::Display for ReviewVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity scale for review findings, most serious first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewSeverity {
    Bug,
    Correctness,
    Design,
    Testing,
    Nit,
}

impl ReviewSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewSeverity::Bug => "bug",
            ReviewSeverity::Correctness => "correctness",
            ReviewSeverity::Design => "design",
            ReviewSeverity::Testing => "testing",
            ReviewSeverity::Nit => "nit",
        }
    }

    fn parse_lenient(value: &str) -> Self {
        match value {
            "bug" => ReviewSeverity::Bug,
            "design" => ReviewSeverity::Design,
            "testing" => ReviewSeverity::Testing,
            "nit" => ReviewSeverity::Nit,
            _ => ReviewSeverity::Correctness,
        }
    }

    fn section_header(&self) -> &'static str {
        match self {
            ReviewSeverity::Bug => "Bugs",
            ReviewSeverity::Correctness => "Correctness",
            ReviewSeverity::Design => "Design",
            ReviewSeverity::Testing => "Testing",
            ReviewSeverity::Nit => "Nits (informational)",
        }
    }
}

impl std::fmt::Display for ReviewSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const SEVERITY_ORDER: [ReviewSeverity; 5] = [
    ReviewSeverity::Bug,
    ReviewSeverity::Correctness,
    ReviewSeverity::Design,
    ReviewSeverity::Testing,
    ReviewSeverity::Nit,
];

/// One actionable review finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub file: String,
    pub severity: ReviewSeverity,
    pub comment: String,
}

/// Parsed result of a review round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub verdict: ReviewVerdict,
    pub findings: Vec<Finding>,
    /// Feedback text handed to the coder when changes were requested.
    pub feedback: String,
}

impl Review {
    pub fn approved(&self) -> bool {
        self.verdict == ReviewVerdict::Approved
    }

    /// The fail-closed review used when reviewer output cannot be parsed.
    fn fail_closed(raw: &str) -> Self {
        Review {
            verdict: ReviewVerdict::ChangesRequested,
            findings: Vec::new(),
            feedback: format!("Could not parse reviewer output: {}", snippet(raw, 500)),
        }
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Format findings grouped by severity for posting back to the change request.
pub fn format_review_body(findings: &[Finding]) -> String {
    let mut sections = Vec::new();
    for severity in SEVERITY_ORDER {
        let group: Vec<&Finding> = findings.iter().filter(|f| f.severity == severity).collect();
        if group.is_empty() {
            continue;
        }
        let mut lines = vec![format!("### {}", severity.section_header())];
        for finding in group {
            lines.push(format!("- **`{}`**: {}", finding.file, finding.comment));
        }
        sections.push(lines.join("\n"));
    }
    sections.join("\n\n")
}

/// Parse raw reviewer output into a [`Review`].
///
/// Unparseable output is logged and downgraded to changes-requested with no
/// findings; an inattentive model must never slip through as an approval.
pub fn parse_review_output(raw: &str) -> Review {
    match try_parse(raw) {
        Ok(review) => review,
        Err(e) => {
            glog_warn!("reviewer output not parseable, failing closed: {}", e);
            Review::fail_closed(raw)
        }
    }
}

fn try_parse(raw: &str) -> Result<Review> {
    let candidates = collect_candidates(raw);

    let data = candidates
        .iter()
        .find_map(|c| extract_json_object(c))
        .ok_or_else(|| {
            let debug = candidates.first().map(String::as_str).unwrap_or(raw);
            Error::AgentOutputParse(snippet(debug, 500))
        })?;

    let verdict = match data.get("verdict").and_then(|v| v.as_str()) {
        Some("approved") => ReviewVerdict::Approved,
        // Unknown verdict strings fail closed.
        _ => ReviewVerdict::ChangesRequested,
    };

    let mut findings = Vec::new();
    if let Some(items) = data.get("items").and_then(|v| v.as_array()) {
        for item in items {
            let Some(obj) = item.as_object() else {
                continue;
            };
            let severity = obj
                .get("severity")
                .and_then(|v| v.as_str())
                .map(ReviewSeverity::parse_lenient)
                .unwrap_or(ReviewSeverity::Correctness);
            findings.push(Finding {
                file: obj
                    .get("file")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                severity,
                comment: obj
                    .get("comment")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }

    let feedback = if findings.is_empty() {
        data.get("comments")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    } else {
        findings
            .iter()
            .map(|f| format!("- [{}] {}: {}", f.severity, f.file, f.comment))
            .collect::<Vec<_>>()
            .join("\n")
    };

    // An approval that still lists findings is contradictory; treat it as a
    // request for changes so we never approve and demand work at once.
    let verdict = if verdict == ReviewVerdict::Approved && !findings.is_empty() {
        ReviewVerdict::ChangesRequested
    } else {
        verdict
    };

    Ok(Review {
        verdict,
        findings,
        feedback,
    })
}

/// Collect text candidates that may hold the verdict JSON.
///
/// JSONL streams put the final answer in a `result` event (highest priority)
/// or in assistant text blocks. Plain JSON output falls back to its `result`
/// or `output` field, and finally the raw text itself.
fn collect_candidates(raw: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        match event.get("type").and_then(|t| t.as_str()) {
            Some("result") => {
                if let Some(text) = event.get("result").and_then(|r| r.as_str()) {
                    if !text.is_empty() {
                        candidates.insert(0, text.to_string());
                    }
                }
            }
            Some("assistant") => {
                let blocks = event
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(|c| c.as_array());
                if let Some(blocks) = blocks {
                    for block in blocks {
                        if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                            if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                                if !text.is_empty() {
                                    candidates.push(text.to_string());
                                }
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    if candidates.is_empty() {
        if let Ok(outer) = serde_json::from_str::<serde_json::Value>(raw) {
            let fallback = outer
                .get("result")
                .and_then(|v| v.as_str())
                .or_else(|| outer.get("output").and_then(|v| v.as_str()));
            candidates.push(fallback.unwrap_or(raw).to_string());
        } else {
            candidates.push(raw.to_string());
        }
    }

    candidates
}

fn try_object(text: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Extract a JSON object from text that may contain surrounding prose.
fn extract_json_object(text: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    if let Some(obj) = try_object(text) {
        return Some(obj);
    }

    let normalized = normalize_json_newlines(text);
    if let Some(obj) = try_object(&normalized) {
        return Some(obj);
    }

    // Markdown code fences, raw first.
    for candidate in [text, normalized.as_str()] {
        for marker in ["```json", "```"] {
            if let Some(start) = candidate.find(marker) {
                let start = start + marker.len();
                if let Some(len) = candidate[start..].find("```") {
                    if let Some(obj) = try_object(candidate[start..start + len].trim()) {
                        return Some(obj);
                    }
                }
            }
        }
    }

    // Last resort: try every '{' as a potential object start.
    for candidate in [text, normalized.as_str()] {
        for (idx, _) in candidate.match_indices('{') {
            if let Some(obj) = try_object(&candidate[idx..]) {
                return Some(obj);
            }
        }
    }

    None
}

/// Escape literal newlines inside JSON string values.
///
/// Models sometimes emit JSON with real newline characters inside strings,
/// which is invalid. This walks the text tracking string boundaries and
/// replaces bare newlines with their escape sequences.
fn normalize_json_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for ch in text.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
        } else if ch == '\\' && in_string {
            out.push(ch);
            escaped = true;
        } else if ch == '"' {
            in_string = !in_string;
            out.push(ch);
        } else if ch == '\n' && in_string {
            out.push_str("\\n");
        } else if ch == '\r' && in_string {
            out.push_str("\\r");
        } else {
            out.push(ch);
        }
    }
    out
}
