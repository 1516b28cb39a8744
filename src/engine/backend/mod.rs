//! Version-Control Backend
//!
//! The only layer that touches the repository. Everything above it speaks
//! in terms of [`GitBackend`], so tests can swap in [`MemoryBackend`].

pub mod git_cli;
pub mod memory;

pub use git_cli::GitCli;
pub use memory::{FailPoint, MemoryBackend};

use super::error::Result;
use serde::{Deserialize, Serialize};

/// Which side of the repository to enumerate branches from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchScope {
    Local,
    /// Remote-tracking branches of the named remote, returned without the
    /// `<remote>/` prefix
    Remote(String),
}

/// Two-sided commit count between a base and a branch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AheadBehind {
    /// Commits on the branch that the base lacks
    pub ahead: u32,
    /// Commits on the base that the branch lacks
    pub behind: u32,
}

/// Author and relative date of a branch tip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub author: String,
    pub relative_date: String,
}

/// Version-control primitives consumed by the branch lifecycle engine.
///
/// Absence is not failure: a missing tag, note or ref comes back as
/// `Ok(None)`, `Ok(false)` or an empty list. `Err` is reserved for commands
/// that actually failed, with their captured stderr.
pub trait GitBackend {
    fn list_branches(&self, scope: &BranchScope) -> Result<Vec<String>>;
    fn branch_exists(&self, name: &str) -> bool;
    /// Resolve a ref to a full commit hash
    fn rev_parse(&self, reference: &str) -> Option<String>;

    fn list_tags(&self, patterns: &[&str]) -> Result<Vec<String>>;
    fn create_tag(&self, name: &str, commit: &str) -> Result<()>;
    fn delete_tag(&self, name: &str) -> Result<()>;

    fn show_note(&self, notes_ref: &str, commit: &str) -> Result<Option<String>>;
    /// Write a note, replacing any existing one on the commit
    fn add_note(&self, notes_ref: &str, commit: &str, payload: &str) -> Result<()>;
    fn remove_note(&self, notes_ref: &str, commit: &str) -> Result<()>;

    fn fetch_tags(&self, remote: &str) -> Result<()>;
    /// Tags present on the remote matching the patterns, as `(name, commit)`
    fn remote_tags(&self, remote: &str, patterns: &[&str]) -> Result<Vec<(String, String)>>;
    fn push_ref(&self, remote: &str, reference: &str) -> Result<()>;
    /// Push a ref, replacing whatever the remote has under the same name in
    /// one update
    fn force_push_ref(&self, remote: &str, reference: &str) -> Result<()>;
    fn push_delete_ref(&self, remote: &str, reference: &str) -> Result<()>;
    /// Push a local branch and set it as upstream
    fn push_branch(&self, remote: &str, branch: &str) -> Result<()>;
    /// Fetch `branch` from the remote and merge it into the current branch
    fn pull(&self, remote: &str, branch: &str) -> Result<()>;

    fn ahead_behind(&self, base: &str, branch: &str) -> Result<AheadBehind>;
    fn checkout(&self, reference: &str) -> Result<()>;
    /// Create a branch at the current HEAD and switch to it
    fn create_branch(&self, name: &str) -> Result<()>;
    fn delete_branch(&self, name: &str, force: bool) -> Result<()>;
    fn merge(&self, reference: &str) -> Result<()>;
    fn current_branch(&self) -> Option<String>;

    fn remotes(&self) -> Result<Vec<String>>;
    fn contributor_count(&self) -> Result<usize>;
    fn commit_count(&self) -> Result<u32>;
    fn has_uncommitted_changes(&self) -> Result<bool>;
    fn has_upstream(&self, branch: &str) -> bool;
    fn last_commit(&self, branch: &str) -> Option<CommitSummary>;
    /// Whether a path relative to the working tree root exists
    fn path_exists(&self, relative: &str) -> bool;
}
