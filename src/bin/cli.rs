//! Branchflow CLI - Main entry point for CLI binary
//!
//! This binary provides the `branchflow` tool for tracking branch states.

use anyhow::{anyhow, bail, Context as _};
use branchflow_lib::engine::{
    backend::{GitBackend, GitCli},
    branch_types::BRANCH_TYPES,
    cli::formatter::{format_duration, pad, CliFormatter},
    cli::{Cli, Commands, OutputFormat},
    config::Config,
    context::{ContextDetector, ContextOverride, NotesContextStore},
    state::{BranchState, StateMutator, StateResolver},
    status::StatusReport,
    sync::{ActionOutcome, Reconciler},
    workflow::{BranchWorkflow, CreateOptions},
};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level());

    if let Err(e) = run_cli(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Logs go to stderr so `--format json` output stays parseable
fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}

/// Backend and config opened once per command
struct Session {
    git: GitCli,
    config: Config,
    json: bool,
}

impl Session {
    fn branch_or_current(&self, branch: Option<String>) -> anyhow::Result<String> {
        branch
            .or_else(|| self.git.current_branch())
            .ok_or_else(|| anyhow!("not on a branch; pass --branch"))
    }
}

fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let json = cli.format == OutputFormat::Json;

    if let Commands::Types = cli.command {
        return cmd_types(json);
    }

    let repo_dir = cli.get_repo_dir();
    let git = GitCli::open(&repo_dir)
        .with_context(|| format!("could not open repository at {}", repo_dir.display()))?;
    let config = Config::load(git.repo_dir())?;
    let session = Session { git, config, json };

    match cli.command {
        Commands::Status => cmd_status(&session)?,
        Commands::Context { force } => cmd_context(&session, force.as_deref())?,
        Commands::State { branch } => cmd_state(&session, branch)?,
        Commands::Set {
            state,
            branch,
            local_only,
        } => cmd_set(&session, &state, branch, local_only)?,
        Commands::Mark { state, branch, delete } => cmd_mark(&session, &state, branch, delete)?,
        Commands::Create {
            branch_type,
            description,
            no_push,
            no_sync,
        } => {
            let options = CreateOptions {
                sync_base: !no_sync,
                push: !no_push,
            };
            cmd_create(&session, &branch_type, &description.join(" "), options)?
        }
        Commands::Sync { dry_run } => cmd_sync(&session, dry_run)?,
        Commands::Types => {}
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        CliFormatter::warning(warning);
    }
}

fn cmd_status(session: &Session) -> anyhow::Result<()> {
    let store = NotesContextStore::new(&session.git, &session.config);
    StateResolver::new(&session.git, &session.config).refresh_remote_markers();
    let status = StatusReport::gather(&session.git, &session.config, &store)?;

    if session.json {
        return print_json(&status);
    }

    CliFormatter::header("Repository");
    let forced = if status.forced { " (forced)" } else { "" };
    CliFormatter::kv("Context", &format!("{}{}", CliFormatter::context(status.context), forced));
    if let Some(current) = &status.current_branch {
        CliFormatter::kv("Current branch", current);
    }
    let tree = if status.uncommitted_changes {
        "uncommitted changes"
    } else {
        "clean"
    };
    CliFormatter::kv("Working tree", tree);
    CliFormatter::kv("Protected", &status.protected_branches.join(", "));

    CliFormatter::header("Branches");
    let branches = &status.branches;
    if branches.is_empty() {
        CliFormatter::info("No topic branches");
        return Ok(());
    }
    let width = branches.iter().map(|b| b.name.len()).max().unwrap_or(0);
    let branch_col = pad("Branch", width);
    CliFormatter::table_header(&[branch_col.as_str(), "State  ", "Base", "Commits"]);
    for info in branches {
        let state = CliFormatter::state(info.state).to_string();
        let state = format!("{}{}", state, " ".repeat(7 - info.state.as_str().len()));
        let base = info.base.clone().unwrap_or_else(|| "-".to_string());
        let commits = info.unique_commits.to_string();
        let name = pad(&info.name, width);
        CliFormatter::table_row(&[name.as_str(), state.as_str(), base.as_str(), commits.as_str()]);
    }
    Ok(())
}

fn cmd_context(session: &Session, force: Option<&str>) -> anyhow::Result<()> {
    let store = NotesContextStore::new(&session.git, &session.config);
    let detector = ContextDetector::new(&session.git, &session.config, &store);

    if let Some(raw) = force {
        let value: ContextOverride = raw.parse()?;
        detector.force(value)?;
        if !session.json {
            match value {
                ContextOverride::Auto => CliFormatter::success("Context detection restored"),
                ContextOverride::Fixed(c) => CliFormatter::success(&format!("Context forced to {}", c)),
            }
        }
    }

    let info = detector.info();
    if session.json {
        return print_json(&info);
    }

    CliFormatter::header("Context");
    let forced = if info.forced { " (forced)" } else { "" };
    CliFormatter::kv("Context", &format!("{}{}", CliFormatter::context(info.context), forced));
    CliFormatter::kv("Remotes", &info.signals.remote_count.to_string());
    CliFormatter::kv("Contributors", &info.signals.contributor_count.to_string());
    CliFormatter::kv("Commits", &info.commit_count.to_string());
    CliFormatter::kv("Integration branch", &info.signals.has_integration_branch.to_string());
    CliFormatter::kv("CI detected", &info.signals.has_ci.to_string());

    CliFormatter::header("Policy");
    let profile = &info.profile;
    CliFormatter::kv("Validation", &format!("{:?}", profile.validation_level).to_lowercase());
    CliFormatter::kv("Protected", &profile.protected_branches.join(", "));
    CliFormatter::kv("Require upstream", &profile.require_upstream.to_string());
    CliFormatter::kv("Require PR", &profile.require_pr.to_string());
    CliFormatter::kv("Linear history", &profile.require_linear_history.to_string());
    CliFormatter::kv("Auto push", &profile.auto_push.to_string());
    Ok(())
}

fn cmd_state(session: &Session, branch: Option<String>) -> anyhow::Result<()> {
    let branch = session.branch_or_current(branch)?;
    let resolver = StateResolver::new(&session.git, &session.config);
    resolver.refresh_remote_markers();
    let info = resolver.describe(&branch);

    if session.json {
        return print_json(&info);
    }

    CliFormatter::header(&info.name);
    CliFormatter::kv("State", &CliFormatter::state(info.state).to_string());
    CliFormatter::kv("Type", info.category.as_deref().unwrap_or("-"));
    CliFormatter::kv("Base", info.base.as_deref().unwrap_or("-"));
    CliFormatter::kv("Unique commits", &info.unique_commits.to_string());
    if info.has_upstream {
        CliFormatter::kv(
            "Upstream",
            &format!("{} ahead, {} behind", info.ahead_of_upstream, info.behind_upstream),
        );
    } else {
        CliFormatter::kv("Upstream", "none");
    }
    if let Some(commit) = &info.last_commit {
        CliFormatter::kv("Last commit", &format!("{} by {}", commit.relative_date, commit.author));
    }
    Ok(())
}

fn cmd_set(session: &Session, state: &str, branch: Option<String>, local_only: bool) -> anyhow::Result<()> {
    let branch = session.branch_or_current(branch)?;
    let outcome = StateMutator::new(&session.git, &session.config).set_state_str(&branch, state, !local_only)?;

    if session.json {
        return print_json(&outcome);
    }
    print_warnings(&outcome.warnings);
    CliFormatter::success(&format!("{} is now {}", branch, CliFormatter::state(outcome.state)));
    if let Some(tag) = &outcome.tag {
        CliFormatter::item(&format!("tag {} on {}", tag, session.config.remote));
    }
    Ok(())
}

fn cmd_mark(session: &Session, state: &str, branch: Option<String>, delete: bool) -> anyhow::Result<()> {
    let branch = session.branch_or_current(branch)?;
    let state: BranchState = state.parse()?;
    let store = NotesContextStore::new(&session.git, &session.config);
    let outcome = BranchWorkflow::new(&session.git, &session.config, &store).mark(&branch, state, delete)?;

    if session.json {
        return print_json(&outcome);
    }
    print_warnings(&outcome.warnings);
    match state {
        BranchState::Merged => CliFormatter::success(&format!("Merged {} into {}", branch, outcome.base)),
        _ => CliFormatter::success(&format!("{} is now {}", branch, CliFormatter::state(state))),
    }
    if outcome.deleted_local {
        CliFormatter::item(&format!("deleted local branch {}", branch));
    }
    Ok(())
}

fn cmd_create(
    session: &Session,
    branch_type: &str,
    description: &str,
    options: CreateOptions,
) -> anyhow::Result<()> {
    let store = NotesContextStore::new(&session.git, &session.config);
    let outcome =
        BranchWorkflow::new(&session.git, &session.config, &store).create_branch(branch_type, description, options)?;

    if session.json {
        return print_json(&outcome);
    }
    print_warnings(&outcome.warnings);
    CliFormatter::success(&format!("Created {} from {}", outcome.branch, outcome.base));
    if outcome.base_synced {
        CliFormatter::item(&format!("updated {} from {}", outcome.base, session.config.remote));
    }
    if outcome.pushed {
        CliFormatter::item(&format!("pushed to {}", session.config.remote));
    }
    Ok(())
}

fn cmd_sync(session: &Session, dry_run: bool) -> anyhow::Result<()> {
    let report = Reconciler::new(&session.git, &session.config).sync_branch_states(dry_run);

    if session.json {
        print_json(&report)?;
    } else {
        let title = if dry_run { "Sync (dry run)" } else { "Sync" };
        CliFormatter::header(title);
        if report.actions.is_empty() && report.errors.is_empty() {
            CliFormatter::success("Remote state tags are up to date");
        }
        for action in &report.actions {
            let line = format!("{} {}", action.branch, action.detail);
            match action.outcome {
                ActionOutcome::Success => CliFormatter::success(&line),
                ActionOutcome::DryRun => CliFormatter::item(&line),
                ActionOutcome::Failure => CliFormatter::error(&line),
            }
        }
        for error in report.unattributed_errors() {
            CliFormatter::error(error);
        }
        let elapsed = (report.finished_at - report.started_at).num_milliseconds();
        CliFormatter::blank();
        CliFormatter::kv("Merged", &report.merged.len().to_string());
        CliFormatter::kv("Deleted", &report.deleted.len().to_string());
        CliFormatter::kv("Took", &format_duration(elapsed));
    }

    if !report.errors.is_empty() {
        bail!("{} branch(es) could not be reconciled", report.errors.len());
    }
    Ok(())
}

fn cmd_types(json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&BRANCH_TYPES);
    }

    CliFormatter::header("Branch types");
    for branch_type in BRANCH_TYPES {
        CliFormatter::kv(
            branch_type.name,
            &format!("{} (from {})", branch_type.description, branch_type.base_priority.join(", ")),
        );
    }
    Ok(())
}
