//! Branch Workflow
//!
//! Higher-level operations built on the resolver and mutator: starting a
//! typed branch off the right base, and closing one out (merge, retire or
//! reopen) while keeping the state markers in step.

use serde::Serialize;
use tracing::{info, warn};

use super::backend::GitBackend;
use super::branch_types::{clean_branch_name, lookup};
use super::config::Config;
use super::context::{ContextDetector, ContextStore};
use super::error::{BranchError, Result};
use super::state::resolver::resolve_base;
use super::state::{BranchState, StateMutator};

/// Remote steps of [`BranchWorkflow::create_branch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOptions {
    /// Pull the base from the remote before branching off it
    pub sync_base: bool,
    /// Push the new branch and set its upstream
    pub push: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            sync_base: true,
            push: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    pub branch: String,
    pub base: String,
    /// Base was pulled from the remote before branching
    pub base_synced: bool,
    pub pushed: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkOutcome {
    pub branch: String,
    pub state: BranchState,
    pub base: String,
    pub deleted_local: bool,
    /// Remote tag left in place by the final state change
    pub tag: Option<String>,
    pub warnings: Vec<String>,
}

pub struct BranchWorkflow<'a> {
    backend: &'a dyn GitBackend,
    config: &'a Config,
    store: &'a dyn ContextStore,
    mutator: StateMutator<'a>,
}

impl<'a> BranchWorkflow<'a> {
    pub fn new(backend: &'a dyn GitBackend, config: &'a Config, store: &'a dyn ContextStore) -> Self {
        Self {
            backend,
            config,
            store,
            mutator: StateMutator::new(backend, config),
        }
    }

    /// Create `<category>/<cleaned description>` from its registered base
    /// and record it as WIP. Pulling the base and pushing are best-effort.
    pub fn create_branch(
        &self,
        category: &str,
        description: &str,
        options: CreateOptions,
    ) -> Result<CreateOutcome> {
        let branch_type =
            lookup(category).ok_or_else(|| BranchError::UnknownBranchType(category.to_string()))?;

        let cleaned = clean_branch_name(description);
        if cleaned.is_empty() {
            return Err(BranchError::InvalidBranchName(description.to_string()));
        }
        let branch = format!("{}/{}", branch_type.name, cleaned);

        if self.backend.branch_exists(&branch) {
            return Err(BranchError::BranchExists(branch));
        }
        if self.backend.has_uncommitted_changes()? {
            return Err(BranchError::DirtyWorkingTree);
        }

        let base = resolve_base(self.backend, self.config, &branch)
            .or_else(|| self.backend.current_branch())
            .ok_or_else(|| BranchError::NoBaseBranch(branch.clone()))?;

        let mut warnings = Vec::new();
        let remotes = self.has_remotes();

        self.backend.checkout(&base)?;
        let mut base_synced = false;
        if options.sync_base && remotes {
            match self.backend.pull(&self.config.remote, &base) {
                Ok(()) => base_synced = true,
                Err(e) => {
                    warn!(base = %base, error = %e, "could not pull base");
                    warnings.push(format!(
                        "could not update '{}' from {}: {}",
                        base, self.config.remote, e
                    ));
                }
            }
        }
        self.backend.create_branch(&branch)?;
        info!(branch = %branch, base = %base, base_synced, "branch created");

        match self.mutator.set_state(&branch, BranchState::Wip, false) {
            Ok(outcome) => warnings.extend(outcome.warnings),
            Err(e) => {
                warn!(branch = %branch, error = %e, "could not record WIP state");
                warnings.push(format!("could not record WIP state: {}", e));
            }
        }

        let mut pushed = false;
        if options.push && remotes {
            match self.backend.push_branch(&self.config.remote, &branch) {
                Ok(()) => pushed = true,
                Err(e) => {
                    warn!(branch = %branch, error = %e, "push failed");
                    warnings.push(format!("could not push to {}: {}", self.config.remote, e));
                }
            }
        }

        Ok(CreateOutcome {
            branch,
            base,
            base_synced,
            pushed,
            warnings,
        })
    }

    /// Declare a branch's state, merging or deleting it as the state implies
    pub fn mark(&self, branch: &str, state: BranchState, delete_local: bool) -> Result<MarkOutcome> {
        if state == BranchState::Unknown {
            return Err(BranchError::InvalidState(state.to_string()));
        }
        if !self.backend.branch_exists(branch) {
            return Err(BranchError::BranchNotFound(branch.to_string()));
        }

        let context = ContextDetector::new(self.backend, self.config, self.store)
            .detect()
            .context;
        if context.profile().is_protected(branch) {
            return Err(BranchError::ProtectedBranch(branch.to_string()));
        }

        let base = resolve_base(self.backend, self.config, branch)
            .ok_or_else(|| BranchError::NoBaseBranch(branch.to_string()))?;

        let mut warnings = Vec::new();
        let mut deleted_local = false;
        let tag = match state {
            BranchState::Merged => {
                self.backend.checkout(&base)?;
                self.backend.merge(branch)?;
                let merged = self.mutator.set_state(branch, BranchState::Merged, true)?;
                warnings.extend(merged.warnings);
                let mut tag = merged.tag;

                if delete_local {
                    match self.mutator.set_state(branch, BranchState::Deleted, true) {
                        Ok(outcome) => {
                            warnings.extend(outcome.warnings);
                            tag = outcome.tag;
                        }
                        Err(e) => warnings.push(format!("could not mark '{}' DELETED: {}", branch, e)),
                    }
                    deleted_local = self.delete_local(branch, &base, &mut warnings);
                }
                tag
            }
            BranchState::Deleted => {
                let outcome = self.mutator.set_state(branch, BranchState::Deleted, true)?;
                warnings.extend(outcome.warnings);
                if delete_local {
                    deleted_local = self.delete_local(branch, &base, &mut warnings);
                }
                outcome.tag
            }
            _ => {
                let outcome = self.mutator.set_state(branch, BranchState::Wip, true)?;
                warnings.extend(outcome.warnings);
                outcome.tag
            }
        };

        info!(branch, state = %state, context = %context, deleted_local, "branch marked");
        Ok(MarkOutcome {
            branch: branch.to_string(),
            state,
            base,
            deleted_local,
            tag,
            warnings,
        })
    }

    fn has_remotes(&self) -> bool {
        self.backend
            .remotes()
            .map(|r| !r.is_empty())
            .unwrap_or(false)
    }

    /// Switch to `base` if needed and drop the local branch. Never forced:
    /// git refuses unmerged work and the refusal becomes a warning.
    fn delete_local(&self, branch: &str, base: &str, warnings: &mut Vec<String>) -> bool {
        if self.backend.current_branch().as_deref() == Some(branch) {
            if let Err(e) = self.backend.checkout(base) {
                warnings.push(format!("could not switch to '{}': {}", base, e));
                return false;
            }
        }
        match self.backend.delete_branch(branch, false) {
            Ok(()) => true,
            Err(e) => {
                warn!(branch, error = %e, "could not delete local branch");
                warnings.push(format!(
                    "could not delete local branch '{}': {}; use `git branch -D {}` to force it",
                    branch, e, branch
                ));
                false
            }
        }
    }
}
