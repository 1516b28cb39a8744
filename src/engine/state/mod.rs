//! Branch Lifecycle State
//!
//! States, marker naming and the `key:value` note payload shared by the
//! resolver and the mutator.

pub mod mutator;
pub mod resolver;

pub use mutator::{SetStateOutcome, StateMutator};
pub use resolver::{BranchInfo, ResolverStrategy, StateResolver};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::BranchError;

pub const BRANCH_STATE_KEY: &str = "branch_state";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BranchState {
    Wip,
    Merged,
    Deleted,
    Unknown,
}

impl BranchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchState::Wip => "WIP",
            BranchState::Merged => "MERGED",
            BranchState::Deleted => "DELETED",
            BranchState::Unknown => "UNKNOWN",
        }
    }

    /// MERGED and DELETED are backed by an authoritative remote tag
    pub fn is_terminal(&self) -> bool {
        matches!(self, BranchState::Merged | BranchState::Deleted)
    }

    /// Tag prefix for terminal states
    pub fn tag_prefix(&self) -> Option<&'static str> {
        match self {
            BranchState::Merged => Some("merged-"),
            BranchState::Deleted => Some("deleted-"),
            _ => None,
        }
    }

    pub fn tag_name(&self, branch: &str) -> Option<String> {
        self.tag_prefix().map(|prefix| format!("{}{}", prefix, branch))
    }
}

impl fmt::Display for BranchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses the three settable states, case-insensitively. `UNKNOWN` is
/// never stored, so it doesn't parse.
impl FromStr for BranchState {
    type Err = BranchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "WIP" => Ok(BranchState::Wip),
            "MERGED" => Ok(BranchState::Merged),
            "DELETED" => Ok(BranchState::Deleted),
            _ => Err(BranchError::InvalidState(s.to_string())),
        }
    }
}

/// Both state tag names for a branch
pub fn tag_family(branch: &str) -> [String; 2] {
    [format!("merged-{}", branch), format!("deleted-{}", branch)]
}

/// Newline-separated `key:value` lines stored in a git note
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotePayload {
    lines: Vec<(String, String)>,
}

impl NotePayload {
    /// Lines without a `:` are dropped
    pub fn parse(raw: &str) -> Self {
        let lines = raw
            .lines()
            .filter_map(|line| {
                let (key, value) = line.split_once(':')?;
                let key = key.trim();
                (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
            })
            .collect();
        Self { lines }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replace every line for `key` with a single new one
    pub fn set(&mut self, key: &str, value: &str) {
        self.remove(key);
        self.lines.push((key.to_string(), value.to_string()));
    }

    pub fn remove(&mut self, key: &str) {
        self.lines.retain(|(k, _)| k != key);
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The stored branch state, if present and valid
    pub fn branch_state(&self) -> Option<BranchState> {
        self.get(BRANCH_STATE_KEY).and_then(|v| v.parse().ok())
    }

    pub fn render(&self) -> String {
        self.lines
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
