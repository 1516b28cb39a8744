//! Branchflow CLI Module
//! Command-line interface for branch lifecycle operations

pub mod formatter;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "branchflow")]
#[command(author = "Branchflow Team")]
#[command(version)]
#[command(about = "Track merged, retired and in-progress branches across clones", long_about = None)]
pub struct Cli {
    /// Repository directory (defaults to current directory)
    #[arg(short = 'C', long, global = true)]
    pub repo: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show context and the state of every local branch
    Status,

    /// Show the detected context, or force one
    Context {
        /// LOCAL, HYBRID, REMOTE, or AUTO to return to detection
        #[arg(long)]
        force: Option<String>,
    },

    /// Resolve the state of a branch
    State {
        /// Branch name (defaults to the current branch)
        branch: Option<String>,
    },

    /// Record a state without merging or deleting anything
    Set {
        /// WIP, MERGED or DELETED
        state: String,

        /// Branch name (defaults to the current branch)
        #[arg(short, long)]
        branch: Option<String>,

        /// Only write the local note; don't touch remote tags
        #[arg(long)]
        local_only: bool,
    },

    /// Merge, retire or reopen a branch
    Mark {
        /// WIP, MERGED or DELETED
        state: String,

        /// Branch name (defaults to the current branch)
        #[arg(short, long)]
        branch: Option<String>,

        /// Delete the local branch afterwards
        #[arg(short, long)]
        delete: bool,
    },

    /// Create a typed branch from its base
    Create {
        /// Branch type (feature, fix, hotfix, ...)
        branch_type: String,

        /// Short description, turned into the branch name
        #[arg(required = true)]
        description: Vec<String>,

        /// Don't push the new branch
        #[arg(long)]
        no_push: bool,

        /// Don't pull the base from the remote first
        #[arg(long)]
        no_sync: bool,
    },

    /// Align remote state tags with local branches
    Sync {
        /// Show what would be marked without changing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// List registered branch types
    Types,
}

impl Cli {
    pub fn get_repo_dir(&self) -> PathBuf {
        self.repo
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Default filter directive for the log subscriber
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    }
}
