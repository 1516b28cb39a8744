//! Reconciliation Engine
//!
//! Brings remote state tags in line with what the local clone observes:
//! local branches that resolve to MERGED get a `merged-` tag, remote
//! branches that no longer exist locally get a `deleted-` tag. Each branch
//! is handled independently; one failure never aborts the batch.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::backend::{BranchScope, GitBackend};
use super::config::Config;
use super::state::{BranchState, StateMutator, StateResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    MarkMerged,
    MarkDeleted,
}

impl ActionKind {
    fn state(&self) -> BranchState {
        match self {
            ActionKind::MarkMerged => BranchState::Merged,
            ActionKind::MarkDeleted => BranchState::Deleted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Success,
    Failure,
    /// Planned but not applied
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationAction {
    pub branch: String,
    pub kind: ActionKind,
    pub outcome: ActionOutcome,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub dry_run: bool,
    /// Branches marked MERGED on the remote by this run
    pub merged: Vec<String>,
    /// Branches marked DELETED on the remote by this run
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
    pub actions: Vec<ReconciliationAction>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    fn new(dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            dry_run,
            merged: Vec::new(),
            deleted: Vec::new(),
            errors: Vec::new(),
            actions: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.merged.is_empty() && self.deleted.is_empty() && self.errors.is_empty()
    }

    /// Errors not already shown by a failed action, such as a branch
    /// listing that aborted the run
    pub fn unattributed_errors(&self) -> Vec<&str> {
        self.errors
            .iter()
            .filter(|error| {
                !self.actions.iter().any(|a| {
                    a.outcome == ActionOutcome::Failure
                        && error.contains(&a.branch)
                        && error.contains(&a.detail)
                })
            })
            .map(String::as_str)
            .collect()
    }

    fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }
}

pub struct Reconciler<'a> {
    backend: &'a dyn GitBackend,
    config: &'a Config,
    resolver: StateResolver<'a>,
    mutator: StateMutator<'a>,
}

impl<'a> Reconciler<'a> {
    pub fn new(backend: &'a dyn GitBackend, config: &'a Config) -> Self {
        Self {
            backend,
            config,
            resolver: StateResolver::new(backend, config),
            mutator: StateMutator::new(backend, config),
        }
    }

    pub fn sync_branch_states(&self, dry_run: bool) -> SyncReport {
        let mut report = SyncReport::new(dry_run);

        let local = match self.branch_set(BranchScope::Local) {
            Ok(set) => set,
            Err(message) => {
                report.errors.push(message);
                return report.finish();
            }
        };
        let remote = match self.branch_set(BranchScope::Remote(self.config.remote.clone())) {
            Ok(set) => set,
            Err(message) => {
                report.errors.push(message);
                return report.finish();
            }
        };

        self.resolver.refresh_remote_markers();

        for branch in &local {
            if !remote.contains(branch) {
                continue;
            }
            if self.resolver.resolve(branch) != BranchState::Merged {
                continue;
            }
            if self.has_remote_marker(branch, BranchState::Merged) {
                continue;
            }
            self.apply(&mut report, branch, ActionKind::MarkMerged);
        }

        for branch in remote.difference(&local) {
            if self.has_remote_marker(branch, BranchState::Deleted) {
                continue;
            }
            self.apply(&mut report, branch, ActionKind::MarkDeleted);
        }

        info!(
            merged = report.merged.len(),
            deleted = report.deleted.len(),
            errors = report.errors.len(),
            dry_run,
            "reconciliation finished"
        );
        report.finish()
    }

    fn branch_set(&self, scope: BranchScope) -> Result<BTreeSet<String>, String> {
        let branches = self
            .backend
            .list_branches(&scope)
            .map_err(|e| format!("could not list {:?} branches: {}", scope, e))?;
        Ok(branches
            .into_iter()
            .filter(|b| !self.config.is_integration_branch(b))
            .collect())
    }

    /// An unanswerable query counts as "no marker"; re-marking is harmless
    fn has_remote_marker(&self, branch: &str, state: BranchState) -> bool {
        let Some(tag) = state.tag_name(branch) else {
            return false;
        };
        match self.backend.remote_tags(&self.config.remote, &[tag.as_str()]) {
            Ok(tags) => tags.iter().any(|(name, _)| *name == tag),
            Err(e) => {
                warn!(branch, tag = %tag, error = %e, "could not query remote tag");
                false
            }
        }
    }

    fn apply(&self, report: &mut SyncReport, branch: &str, kind: ActionKind) {
        let state = kind.state();
        if report.dry_run {
            report.actions.push(ReconciliationAction {
                branch: branch.to_string(),
                kind,
                outcome: ActionOutcome::DryRun,
                detail: format!("would mark {} on {}", state, self.config.remote),
            });
            return;
        }

        match self.mutator.set_state(branch, state, true) {
            Ok(outcome) => {
                match kind {
                    ActionKind::MarkMerged => report.merged.push(branch.to_string()),
                    ActionKind::MarkDeleted => report.deleted.push(branch.to_string()),
                }
                let detail = if outcome.warnings.is_empty() {
                    format!("marked {} at {}", state, outcome.commit)
                } else {
                    format!("marked {} at {} ({})", state, outcome.commit, outcome.warnings.join("; "))
                };
                report.actions.push(ReconciliationAction {
                    branch: branch.to_string(),
                    kind,
                    outcome: ActionOutcome::Success,
                    detail,
                });
            }
            Err(e) => {
                warn!(branch, state = %state, error = %e, "could not mark branch");
                report
                    .errors
                    .push(format!("could not mark {} as {}: {}", branch, state, e));
                report.actions.push(ReconciliationAction {
                    branch: branch.to_string(),
                    kind,
                    outcome: ActionOutcome::Failure,
                    detail: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::{FailPoint, MemoryBackend};

    /// develop + a merged feature, a WIP feature and a branch removed locally
    fn repo() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.add_remote("origin");
        backend.branch("develop", "main");
        backend.publish("origin", "main");
        backend.publish("origin", "develop");

        backend.branch("feature/done", "develop");
        backend.commit_on("feature/done", "Bob", 2);
        backend.publish("origin", "feature/done");
        backend.checkout("develop").unwrap();
        backend.merge("feature/done").unwrap();

        backend.branch("feature/wip", "develop");
        backend.commit_on("feature/wip", "Bob", 1);
        backend.publish("origin", "feature/wip");

        backend.branch("fix/gone", "develop");
        backend.commit_on("fix/gone", "Carol", 1);
        backend.publish("origin", "fix/gone");
        backend.drop_branch("fix/gone");
        backend
    }

    #[test]
    fn test_sync_marks_merged_and_deleted() {
        let backend = repo();
        let config = Config::default();
        let report = Reconciler::new(&backend, &config).sync_branch_states(false);

        assert_eq!(report.merged, vec!["feature/done"]);
        assert_eq!(report.deleted, vec!["fix/gone"]);
        assert!(report.errors.is_empty());
        assert!(backend.remote_tag("origin", "merged-feature/done").is_some());
        assert!(backend.remote_tag("origin", "deleted-fix/gone").is_some());
        assert!(backend.remote_tag("origin", "merged-feature/wip").is_none());
        assert!(report.actions.iter().all(|a| a.outcome == ActionOutcome::Success));
    }

    #[test]
    fn test_sync_is_idempotent() {
        let backend = repo();
        let config = Config::default();
        let reconciler = Reconciler::new(&backend, &config);

        let first = reconciler.sync_branch_states(false);
        assert!(!first.is_clean());
        let second = reconciler.sync_branch_states(false);
        assert!(second.merged.is_empty());
        assert!(second.deleted.is_empty());
        assert!(second.actions.is_empty());
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let backend = repo();
        let config = Config::default();
        let report = Reconciler::new(&backend, &config).sync_branch_states(true);

        assert!(report.dry_run);
        assert!(report.merged.is_empty() && report.deleted.is_empty());
        assert_eq!(report.actions.len(), 2);
        assert!(report.actions.iter().all(|a| a.outcome == ActionOutcome::DryRun));
        assert!(backend.remote_tag("origin", "merged-feature/done").is_none());
        assert!(backend.list_tags(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_failures_are_isolated() {
        let backend = repo();
        backend.fail(FailPoint::Push);
        let config = Config::default();
        let report = Reconciler::new(&backend, &config).sync_branch_states(false);

        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.actions.len(), 2);
        assert!(report.actions.iter().all(|a| a.outcome == ActionOutcome::Failure));
        assert!(report.unattributed_errors().is_empty());

        backend.recover(FailPoint::Push);
        let retry = Reconciler::new(&backend, &config).sync_branch_states(false);
        assert_eq!(retry.merged, vec!["feature/done"]);
        assert_eq!(retry.deleted, vec!["fix/gone"]);
    }

    #[test]
    fn test_integration_branches_skipped() {
        let backend = repo();
        backend.drop_branch("develop");
        let config = Config::default();
        let report = Reconciler::new(&backend, &config).sync_branch_states(true);
        assert!(report.actions.iter().all(|a| a.branch != "develop"));
    }

    #[test]
    fn test_listing_failure_aborts_early() {
        let backend = repo();
        backend.fail(FailPoint::ListBranches);
        let config = Config::default();
        let report = Reconciler::new(&backend, &config).sync_branch_states(false);
        assert_eq!(report.errors.len(), 1);
        assert!(report.actions.is_empty());
        assert_eq!(report.unattributed_errors().len(), 1);
        assert!(report.unattributed_errors()[0].starts_with("could not list"));
    }

    #[test]
    fn test_existing_remote_marker_skips_branch() {
        let backend = repo();
        let tip = backend.rev_parse("origin/fix/gone").unwrap();
        backend.put_remote_tag("origin", "deleted-fix/gone", &tip);
        let config = Config::default();
        let report = Reconciler::new(&backend, &config).sync_branch_states(false);
        assert!(report.deleted.is_empty());
        assert_eq!(report.merged, vec!["feature/done"]);
    }
}
