//! Prompt templates for the coder and reviewer agents.
//!
//! Every prompt the system sends lives here, assembled from shared building
//! blocks so the coder and reviewer stay consistent about branch discipline
//! and the expected output shape.

const DESIGN_PRINCIPLE: &str = "DESIGN PRINCIPLE:\n\
    For each proposed change, examine the existing system and redesign it \
    into the most elegant solution that would have emerged if the change \
    had been a foundational assumption from the start.";

const PARTIAL_WORK_NOTICE: &str = "\nIMPORTANT: There are uncommitted changes from a previous attempt. \
    Review what was already done with `git diff` and `git status`, \
    then continue from where it left off. Do not start over.";

const SEVERITY_SCALE: &str = "Each item MUST include a severity:\n\
    - \"bug\": incorrect behavior, data loss, security vulnerability\n\
    - \"correctness\": missing edge case, wrong assumption, inadequate error handling\n\
    - \"design\": poor abstraction, bolted-on change, maintainability concern\n\
    - \"testing\": missing or insufficient tests for non-trivial logic\n\
    - \"nit\": minor improvement (include sparingly)";

const COMMENT_RULES: &str = "HOW TO WRITE COMMENTS:\n\
    Each comment must be a clear, single directive — tell the coder exactly \
    what to do. Do NOT present alternatives ('either X or Y'), do NOT list \
    options, and do NOT leave the decision to the implementer. Pick the best \
    fix and state it. A coder agent will apply your feedback verbatim.";

const JSON_SHAPE: &str = "Respond with ONLY this JSON (no markdown, no code fences):\n\
    {\"verdict\": \"approved\" or \"changes-requested\", \
    \"items\": [{\"file\": \"path/to/file.rs\", \"severity\": \"bug\", \
    \"comment\": \"what to fix\"}, ...]}";

/// Everything needed to assemble a coder prompt.
#[derive(Debug, Clone, Default)]
pub struct CoderContext {
    pub branch: String,
    pub base_branch: String,
    pub issue_slug: String,
    pub issue_prompt: String,
    pub issue_url: String,
    /// Uncommitted changes from an earlier attempt exist in the workspace.
    pub has_partial_work: bool,
    /// Continuing an interrupted agent session instead of starting fresh.
    pub is_resume: bool,
}

fn branch_rules(branch: &str) -> String {
    format!(
        "CRITICAL RULES:\n\
         - You are on branch `{branch}`. \
         Do NOT create, switch, or checkout any other branch.\n\
         - Commit directly on `{branch}`. Do NOT use `git checkout -b`.\n\
         - Verify with `git branch --show-current` before committing if unsure."
    )
}

fn publish_instructions(branch: &str, base_branch: &str, close_ref: &str) -> String {
    format!(
        "1. Commit your changes on the CURRENT branch (`{branch}`)\n\
         2. Push: `git push --set-upstream origin {branch}`\n\
         3. Create a PR with `gh pr create --base {base_branch}`. \
         Write the PR body to a temporary file first, then pass it with `--body-file`:\n\
         \x20  echo 'your body text here' > /tmp/pr-body.md\n\
         \x20  gh pr create --base {base_branch} --title \"your title\" --body-file /tmp/pr-body.md\n\
         \x20  This avoids shell escaping issues. Keep the body plain text — \
         no backticks, no code fences, no special characters.\n\
         \x20  Include `{close_ref}` in the body.\n\n\
         Once the PR is created, you are DONE. \
         Do NOT edit or update the PR after creation. \
         Do NOT write a summary of what you implemented — \
         the PR description is sufficient. Just stop."
    )
}

/// Build the full prompt for the coder agent.
pub fn build_coder_prompt(ctx: &CoderContext) -> String {
    let rules = branch_rules(&ctx.branch);

    let close_ref = if ctx.issue_slug.chars().all(|c| c.is_ascii_digit()) {
        format!("Closes #{}", ctx.issue_slug)
    } else if !ctx.issue_url.is_empty() {
        format!("Implements {}", ctx.issue_url)
    } else {
        ctx.issue_slug.clone()
    };
    let publish = publish_instructions(&ctx.branch, &ctx.base_branch, &close_ref);

    if ctx.is_resume {
        return format!(
            "The previous session was interrupted. \
             Review the current state with `git status` and `git diff`.\n\n\
             {DESIGN_PRINCIPLE}\n\n\
             {rules}\n\n\
             If the implementation is already complete and committed, \
             just push and create the PR. Otherwise, finish the implementation first.\n\n\
             Make sure you:\n{publish}"
        );
    }

    let mut prompt = format!(
        "You are working in a git worktree on branch `{}` (based on `{}`).\n\n\
         {DESIGN_PRINCIPLE}\n\n\
         {rules}\n\n\
         After implementing the changes, you MUST:\n{publish}",
        ctx.branch, ctx.base_branch
    );
    if ctx.has_partial_work {
        prompt.push('\n');
        prompt.push_str(PARTIAL_WORK_NOTICE);
    }
    prompt.push_str(&format!("\n\n{}", ctx.issue_prompt));
    prompt
}

/// Build the prompt for the reviewer agent.
///
/// Round 1 gets a full review prompt. Later rounds get a follow-up prompt
/// that verifies the previous findings were actually resolved instead of
/// re-reviewing from scratch.
pub fn build_review_prompt(
    number: u64,
    head_branch: &str,
    base_branch: &str,
    round: u32,
    previous_feedback: &str,
) -> String {
    if round > 1 && !previous_feedback.is_empty() {
        return format!(
            "You previously reviewed pull request #{number} \
             ({head_branch} → {base_branch}) and requested changes.\n\n\
             Your previous findings were:\n{previous_feedback}\n\n\
             The author has pushed fixes. \
             Do NOT use `gh` commands — `gh` is not available in this environment.\n\n\
             Steps:\n\
             1. Run `git diff {base_branch}...HEAD` to see the FULL current state of the PR\n\
             2. For each previous finding, verify that the fix is ACTUALLY correct — \
             not just that code was changed, but that the underlying issue is truly resolved\n\
             3. Check whether the fixes introduced NEW issues: bugs, broken logic, \
             missing error handling, poor design, or inadequate tests\n\
             4. Read surrounding code to confirm the fixes integrate cleanly\n\n\
             VERIFICATION RULES:\n\
             - A finding is NOT addressed if the fix is superficial, incomplete, or incorrect. \
             Renaming a variable does not fix a logic bug. Adding error handling that swallows \
             errors does not fix error handling.\n\
             - Report new issues introduced by the fixes — these are NOT limited to regressions. \
             If a fix adds new code that has bugs, design problems, or missing tests, flag them.\n\
             - Do NOT flag pure style or naming preferences.\n\
             - Approve ONLY if all previous findings are properly resolved AND the fixes \
             did not introduce new blocking issues.\n\n\
             {DESIGN_PRINCIPLE}\n\n\
             {COMMENT_RULES}\n\n\
             Report at most 7 items, prioritized by severity — bugs first.\n\n\
             {SEVERITY_SCALE}\n\n\
             Do NOT run `gh pr review` or post anything to GitHub.\n\
             Do NOT explain your reasoning or write an overall assessment.\n\n\
             {JSON_SHAPE}\n\n\
             Each item is one finding: either a previous issue not properly addressed, \
             or a new issue introduced by the fixes. \
             If everything looks good, use \"approved\" with an empty list."
        );
    }

    format!(
        "Review pull request #{number} ({head_branch} → {base_branch}).\n\n\
         You are in a git worktree checked out to the PR branch. \
         The files on disk ARE the PR's code. \
         Do NOT use `gh` commands — `gh` is not available in this environment.\n\n\
         Steps:\n\
         1. Run `git diff {base_branch}...HEAD` to see what this branch changed\n\
         2. Read any files you need for context — they are already the PR's version\n\
         3. Review the change holistically: correctness, design, edge cases, \
         error handling, testability, and whether it fits cleanly into the \
         existing architecture.\n\n\
         DESIGN PRINCIPLE — apply this lens to every change:\n\
         For each proposed change, examine the existing system and redesign it \
         into the most elegant solution that would have emerged if the change \
         had been a foundational assumption from the start. \
         If the PR bolts something on rather than integrating it properly, \
         request changes.\n\n\
         WHAT TO LOOK FOR:\n\
         - Bugs, incorrect behavior, data loss, security vulnerabilities\n\
         - Missing or inadequate error handling\n\
         - Edge cases that could realistically occur in production\n\
         - Poor abstractions, unnecessary complexity, or leaky design\n\
         - Code that should have tests but doesn't\n\
         - Violations of project conventions or inconsistency with existing patterns\n\
         - Changes that will be painful to maintain or extend\n\n\
         WHAT TO IGNORE:\n\
         - Pure stylistic preferences (formatting, naming bikeshedding)\n\
         - Hypothetical scenarios that require truly unlikely conditions\n\n\
         {COMMENT_RULES}\n\n\
         Report at most 7 items, prioritized by severity — bugs first.\n\n\
         {SEVERITY_SCALE}\n\n\
         Only approve if the code is correct, well-designed, properly tested, \
         and properly integrated into the existing system. \
         When in doubt, request changes.\n\n\
         Do NOT run `gh pr review` or post anything to GitHub.\n\
         Do NOT explain your reasoning or write an overall assessment.\n\n\
         {JSON_SHAPE}\n\n\
         Each item is one actionable finding with the file it relates to. \
         If approved, items should be an empty list."
    )
}

/// Build the prompt sent to the coder when applying review feedback.
pub fn build_feedback_prompt(feedback: &str) -> String {
    format!(
        "Apply the following review feedback to the code.\n\
         You MUST address EVERY item listed below — do not skip any.\n\
         After making all changes, create a NEW commit (do NOT amend the previous \
         commit — use `git commit`, never `git commit --amend`) and push. \
         Do NOT write a summary of what you changed — just make the fixes, \
         commit, and push. Once pushed, you are DONE — just stop.\n\n\
         {feedback}"
    )
}
