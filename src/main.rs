use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use gaffer::agent::{coder_agent, reviewer_agent, Agent};
use gaffer::config::Config;
use gaffer::epic::is_epic;
use gaffer::events::{self, PipelineEvent};
use gaffer::issue::{parse_issue_ref, parse_issue_refs};
use gaffer::orchestrator::Orchestrator;
use gaffer::report::RunReport;
use gaffer::tracker::{tracker_for, Tracker};
use gaffer::vcs::{GitVcs, Vcs};
use gaffer::{glog, glog_error, Error, Result};

/// Gaffer - pipeline issues from your tracker through AI coding agents
#[derive(Parser, Debug)]
#[command(name = "gaffer")]
#[command(version, about, long_about = None)]
#[command(arg_required_else_help = true)]
#[command(
    after_help = "ENVIRONMENT:\n    GAFFER_DEBUG=1     Enable debug logging (alternative to --debug)\n    LINEAR_API_KEY     API key used when issue refs are Linear (ENG-123)"
)]
pub struct Cli {
    /// Enable debug logging (writes to ~/.gaffer/gaffer.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Implement one or more issues end to end
    Run {
        /// Issue ref(s), comma-separated. GitHub: 123, Linear: ENG-123
        #[arg(short = 'i', long = "issue")]
        issue: String,

        /// Coder backend (claude-code or codex)
        #[arg(short = 'b', long)]
        backend: Option<String>,

        /// Reviewer backend (claude-code or codex)
        #[arg(short = 'r', long)]
        reviewer_backend: Option<String>,

        /// Maximum review rounds before giving up
        #[arg(long)]
        max_rounds: Option<u32>,

        /// Iteration mode (full or single-pass)
        #[arg(long)]
        iteration_mode: Option<String>,

        /// Number of parallel workers (implies --parallel)
        #[arg(short = 'w', long)]
        workers: Option<usize>,

        /// Run issues in parallel instead of sequentially
        #[arg(short = 'p', long)]
        parallel: bool,

        /// Base branch for workspaces and change requests
        #[arg(long)]
        base_branch: Option<String>,

        /// Merge method (squash, merge, or rebase)
        #[arg(long)]
        merge_method: Option<String>,

        /// Merge strategy (auto, wait, or skip)
        #[arg(long)]
        merge_strategy: Option<String>,

        /// Remove any existing workspace before starting
        #[arg(long)]
        clean: bool,
    },

    /// Remove workspaces left behind by previous runs
    Cleanup {
        /// Issue ref(s) to clean up, comma-separated
        #[arg(short = 'i', long = "issue")]
        issue: Option<String>,

        /// Remove every gaffer workspace
        #[arg(long)]
        all: bool,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    gaffer::log::init(cli.debug);

    let code = match dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            glog_error!("{}", e);
            eprintln!("error: {e}");
            1
        }
    };
    std::process::exit(code);
}

async fn dispatch(command: Command) -> Result<i32> {
    match command {
        Command::Run {
            issue,
            backend,
            reviewer_backend,
            max_rounds,
            iteration_mode,
            workers,
            parallel,
            base_branch,
            merge_method,
            merge_strategy,
            clean,
        } => {
            let mut config = Config::load()?;
            if let Some(value) = backend {
                config.coder_backend = value.parse()?;
            }
            if let Some(value) = reviewer_backend {
                config.reviewer_backend = value.parse()?;
            }
            if let Some(value) = max_rounds {
                config.max_review_rounds = value;
            }
            if let Some(value) = iteration_mode {
                config.iteration_mode = value.parse()?;
            }
            if parallel || workers.is_some() {
                config.sequential = false;
            }
            if let Some(value) = workers {
                config.parallel_workers = value;
            }
            if let Some(value) = base_branch {
                config.base_branch = value;
            }
            if let Some(value) = merge_method {
                config.merge_method = value.parse()?;
            }
            if let Some(value) = merge_strategy {
                config.merge_strategy = value.parse()?;
            }
            if clean {
                config.clean = true;
            }
            run_issues(&issue, config).await
        }
        Command::Cleanup { issue, all } => run_cleanup(issue.as_deref(), all).await,
        Command::Config => {
            let config = Config::load()?;
            print!("{}", config.to_toml_string()?);
            Ok(0)
        }
        Command::Version => {
            println!("gaffer {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}

/// Run the pipeline for every ref in `issue`, honoring the concurrency and
/// merge settings in `config`. Returns the process exit code.
async fn run_issues(issue: &str, config: Config) -> Result<i32> {
    let refs = parse_issue_refs(issue)?;
    let kind = refs[0].kind;
    let config = Arc::new(config);

    let vcs: Arc<dyn Vcs> = Arc::new(GitVcs::open()?);
    let tracker: Arc<dyn Tracker> = Arc::from(tracker_for(kind, &config)?);
    let coder: Arc<dyn Agent> = Arc::from(coder_agent(
        config.coder_backend,
        &config.coder_model,
        config.skip_permissions,
    )?);
    let reviewer: Arc<dyn Agent> = Arc::from(reviewer_agent(
        config.reviewer_backend,
        &config.reviewer_model,
        config.skip_permissions,
    )?);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancellation requested, stopping in-flight work...");
            ctrl_c_cancel.cancel();
        }
    });

    let (events, rx) = events::channel();
    let printer = tokio::spawn(print_events(rx));

    let mut issues = Vec::new();
    for reference in &refs {
        issues.push(tracker.fetch(reference).await?);
    }

    let orchestrator = Orchestrator::new(
        config,
        vcs,
        tracker,
        coder,
        reviewer,
        events.clone(),
        cancel.clone(),
    );

    // A single ref that looks like an epic routes to grouped execution; an
    // epic with no recognizable children runs as a normal issue.
    let report: RunReport = if issues.len() == 1 && is_epic(&issues[0]) {
        let plan = orchestrator.epic_plan_for(&issues[0]).await?;
        if plan.is_empty() {
            orchestrator.run(issues).await
        } else {
            orchestrator.run_epic(plan).await
        }
    } else {
        orchestrator.run(issues).await
    };

    // Drop every sender so the printer drains the channel and exits.
    drop(orchestrator);
    drop(events);
    let _ = printer.await;

    println!("\n{}", report.summary());
    glog!("exiting with {} task(s) recorded", report.entries.len());

    if cancel.is_cancelled() {
        return Ok(130);
    }
    Ok(if report.all_succeeded() { 0 } else { 1 })
}

/// Remove workspaces for specific issues, or all of them with `--all`.
async fn run_cleanup(issue: Option<&str>, all: bool) -> Result<i32> {
    if !all && issue.is_none() {
        return Err(Error::Validation(
            "specify --issue <ref> or --all".to_string(),
        ));
    }
    let vcs = GitVcs::open()?;

    if all {
        let removed = vcs.remove_all_workspaces().await?;
        if removed.is_empty() {
            println!("No gaffer workspaces found.");
        } else {
            for path in &removed {
                println!("Removed {path}");
            }
            println!("Removed {} workspace(s)", removed.len());
        }
        return Ok(0);
    }

    if let Some(tokens) = issue {
        for token in tokens.split(',').filter(|t| !t.trim().is_empty()) {
            let reference = parse_issue_ref(token)?;
            if vcs.remove_workspace_for(&reference.id).await? {
                println!("Removed workspace for {reference}");
            } else {
                println!("No workspace found for {reference}");
            }
        }
    }
    Ok(0)
}

/// Render pipeline events as terse progress lines.
async fn print_events(mut rx: mpsc::UnboundedReceiver<PipelineEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::Started { issue } => println!("▶ {issue} starting"),
            PipelineEvent::WorkspaceReady { issue, path } => {
                println!("  {issue} workspace ready at {}", path.display());
            }
            PipelineEvent::Implementing { issue, resumed } => {
                let suffix = if resumed { " (resumed)" } else { "" };
                println!("  {issue} implementing{suffix}");
            }
            PipelineEvent::ChangePublished { issue, number, url } => {
                println!("  {issue} change #{number} published: {url}");
            }
            PipelineEvent::ReviewRound {
                issue,
                round,
                max_rounds,
            } => println!("  {issue} review round {round}/{max_rounds}"),
            PipelineEvent::Verdict {
                issue,
                round,
                approved,
                finding_count,
            } => {
                if approved {
                    println!("  {issue} round {round}: approved");
                } else {
                    println!(
                        "  {issue} round {round}: changes requested ({finding_count} finding(s))"
                    );
                }
            }
            PipelineEvent::ApplyingFeedback { issue, round } => {
                println!("  {issue} applying feedback from round {round}");
            }
            PipelineEvent::Merging { issue, number } => {
                println!("  {issue} merging change #{number}");
            }
            PipelineEvent::AwaitingMerge { issue, number, url } => {
                println!("  {issue} waiting for change #{number} to merge: {url}");
            }
            PipelineEvent::Merged { issue, number } => {
                println!("  {issue} change #{number} merged");
            }
            PipelineEvent::GroupStarted {
                index,
                total,
                members,
            } => println!("▶ group {index}/{total}: {}", members.join(", ")),
            PipelineEvent::Completed { issue, change } => match change {
                Some(change) => println!("✓ {issue} completed: {}", change.url),
                None => println!("✓ {issue} completed"),
            },
            PipelineEvent::Failed { issue, error } => println!("✗ {issue} failed: {error}"),
            PipelineEvent::Skipped { issue, reason } => println!("- {issue} skipped: {reason}"),
            PipelineEvent::Note { issue, message } => println!("  {issue} {message}"),
        }
    }
}
