//! Branchflow Error Types

use std::io;
use thiserror::Error;

use super::config::ConfigError;

/// Coarse classification used by callers to decide how loudly to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or repository layout; retrying won't help
    Configuration,
    /// A git command failed
    Backend,
    /// Fetch/push/ls-remote failed; usually recoverable
    TransientNetwork,
}

#[derive(Error, Debug)]
pub enum BranchError {
    #[error("Invalid branch state: {0} (expected WIP, MERGED or DELETED)")]
    InvalidState(String),

    #[error("Invalid context: {0} (expected LOCAL, HYBRID, REMOTE or AUTO)")]
    InvalidContext(String),

    #[error("No base branch could be resolved for '{0}'")]
    NoBaseBranch(String),

    #[error("Unknown branch type: {0}")]
    UnknownBranchType(String),

    #[error("Invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Branch already exists: {0}")]
    BranchExists(String),

    #[error("Refusing to change protected branch: {0}")]
    ProtectedBranch(String),

    #[error("Working tree has uncommitted changes")]
    DirtyWorkingTree,

    #[error("Merge of '{branch}' failed: {stderr}")]
    MergeFailed { branch: String, stderr: String },

    #[error("git {command} failed: {stderr}")]
    Backend { command: String, stderr: String },

    #[error("git {command} failed (network): {stderr}")]
    TransientNetwork { command: String, stderr: String },

    #[error("git executable not found: {0}")]
    GitNotFound(#[from] which::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BranchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BranchError::Backend { .. }
            | BranchError::MergeFailed { .. }
            | BranchError::GitNotFound(_)
            | BranchError::Io(_) => ErrorKind::Backend,
            BranchError::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            _ => ErrorKind::Configuration,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientNetwork
    }
}

pub type Result<T> = std::result::Result<T, BranchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            BranchError::InvalidState("DONE".to_string()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            BranchError::NoBaseBranch("feature/x".to_string()).kind(),
            ErrorKind::Configuration
        );
        let push = BranchError::TransientNetwork {
            command: "push".to_string(),
            stderr: "could not resolve host".to_string(),
        };
        assert!(push.is_transient());
        let tag = BranchError::Backend {
            command: "tag".to_string(),
            stderr: "already exists".to_string(),
        };
        assert_eq!(tag.kind(), ErrorKind::Backend);
        assert!(tag.to_string().contains("already exists"));
    }
}
