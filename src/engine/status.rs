//! Repository status overview
//!
//! One snapshot for `branchflow status`: the active context and its
//! protected branches, the working tree, and every topic branch resolved.

use serde::Serialize;

use super::backend::{BranchScope, GitBackend};
use super::config::Config;
use super::context::{Context, ContextDetector, ContextStore};
use super::error::Result;
use super::state::{BranchInfo, StateResolver};

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub context: Context,
    pub forced: bool,
    pub current_branch: Option<String>,
    pub uncommitted_changes: bool,
    /// Branches the active context refuses to mark
    pub protected_branches: Vec<String>,
    /// Local branches other than the integration branches
    pub branches: Vec<BranchInfo>,
}

impl StatusReport {
    /// Assumes the caller already refreshed remote markers if it wants them
    pub fn gather(backend: &dyn GitBackend, config: &Config, store: &dyn ContextStore) -> Result<Self> {
        let detected = ContextDetector::new(backend, config, store).detect();
        let resolver = StateResolver::new(backend, config);

        let branches = backend
            .list_branches(&BranchScope::Local)?
            .iter()
            .filter(|b| !config.is_integration_branch(b))
            .map(|b| resolver.describe(b))
            .collect();

        Ok(Self {
            context: detected.context,
            forced: detected.forced,
            current_branch: backend.current_branch(),
            uncommitted_changes: backend.has_uncommitted_changes()?,
            protected_branches: detected
                .context
                .profile()
                .protected_branches
                .iter()
                .map(|b| b.to_string())
                .collect(),
            branches,
        })
    }
}
