//! Branch State Mutator
//!
//! Records a declared state in both marker stores: the local note on the
//! branch tip, and (for MERGED/DELETED with propagation) the remote tag.
//!
//! The two stores can't be updated atomically. The tag update is a
//! compare-and-swap: the new tag is established and verified on the remote
//! before the opposite-state tag is removed, so a failed push never leaves
//! the branch without its previous authoritative marker. A same-name tag on
//! another commit is replaced by a single forced push, never delete then
//! push.

use serde::Serialize;
use tracing::{info, warn};

use super::resolver::branch_tip;
use super::{tag_family, BranchState, NotePayload, BRANCH_STATE_KEY};
use crate::engine::backend::GitBackend;
use crate::engine::config::Config;
use crate::engine::error::{BranchError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct SetStateOutcome {
    pub branch: String,
    pub state: BranchState,
    /// Commit the markers were attached to
    pub commit: String,
    /// True when the branch ref was gone and `HEAD` was used instead
    pub imprecise_target: bool,
    pub note_written: bool,
    /// Remote tag established by this call
    pub tag: Option<String>,
    pub warnings: Vec<String>,
}

pub struct StateMutator<'a> {
    backend: &'a dyn GitBackend,
    config: &'a Config,
}

impl<'a> StateMutator<'a> {
    pub fn new(backend: &'a dyn GitBackend, config: &'a Config) -> Self {
        Self { backend, config }
    }

    /// Parse `state` then [`set_state`](Self::set_state)
    pub fn set_state_str(
        &self,
        branch: &str,
        state: &str,
        propagate_remote: bool,
    ) -> Result<SetStateOutcome> {
        self.set_state(branch, state.parse()?, propagate_remote)
    }

    pub fn set_state(
        &self,
        branch: &str,
        state: BranchState,
        propagate_remote: bool,
    ) -> Result<SetStateOutcome> {
        if state == BranchState::Unknown {
            return Err(BranchError::InvalidState(state.to_string()));
        }

        let mut warnings = Vec::new();
        let (commit, imprecise_target) = self.target_commit(branch, &mut warnings)?;
        let note_written = self.write_note(branch, &commit, state, &mut warnings);

        let new_tag = if state.is_terminal() && propagate_remote {
            state.tag_name(branch)
        } else {
            None
        };
        if let Some(tag) = &new_tag {
            self.establish_tag(tag, &commit)?;
        }

        for stale in tag_family(branch) {
            if new_tag.as_ref() == Some(&stale) {
                continue;
            }
            self.remove_tag(&stale, propagate_remote, &mut warnings);
        }

        if !note_written && new_tag.is_none() {
            let message = format!(
                "state {} for '{}' was not recorded in any marker; it will resolve from commit history",
                state, branch
            );
            warn!("{}", message);
            warnings.push(message);
        }

        info!(branch, state = %state, commit = %commit, propagate_remote, "branch state set");
        Ok(SetStateOutcome {
            branch: branch.to_string(),
            state,
            commit,
            imprecise_target,
            note_written,
            tag: new_tag,
            warnings,
        })
    }

    fn target_commit(&self, branch: &str, warnings: &mut Vec<String>) -> Result<(String, bool)> {
        if let Some(commit) = branch_tip(self.backend, self.config, branch) {
            return Ok((commit, false));
        }
        let head = self
            .backend
            .rev_parse("HEAD")
            .ok_or_else(|| BranchError::BranchNotFound(branch.to_string()))?;
        let message = format!(
            "branch '{}' has no ref; markers attached to HEAD ({}) instead",
            branch, head
        );
        warn!("{}", message);
        warnings.push(message);
        Ok((head, true))
    }

    /// Rewrite the `branch_state` line of the note, keeping any other lines
    fn write_note(
        &self,
        branch: &str,
        commit: &str,
        state: BranchState,
        warnings: &mut Vec<String>,
    ) -> bool {
        let notes_ref = &self.config.notes_ref;
        let mut payload = match self.backend.show_note(notes_ref, commit) {
            Ok(Some(raw)) => NotePayload::parse(&raw),
            Ok(None) => NotePayload::default(),
            Err(e) => {
                warn!(branch, error = %e, "could not read existing note");
                NotePayload::default()
            }
        };
        payload.set(BRANCH_STATE_KEY, state.as_str());

        match self.backend.add_note(notes_ref, commit, &payload.render()) {
            Ok(()) => true,
            Err(e) => {
                let message = format!("could not write note for '{}': {}", branch, e);
                warn!("{}", message);
                warnings.push(message);
                false
            }
        }
    }

    fn establish_tag(&self, tag: &str, commit: &str) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.try_establish_tag(tag, commit) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.config.marker_attempts => {
                    warn!(tag, attempt, error = %e, "state tag not established, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    warn!(tag, attempt, error = %e, "giving up on state tag");
                    return Err(e);
                }
            }
        }
    }

    fn try_establish_tag(&self, tag: &str, commit: &str) -> Result<()> {
        match self.backend.rev_parse(&format!("refs/tags/{}", tag)) {
            Some(existing) if existing == commit => {}
            Some(_) => {
                self.backend.delete_tag(tag)?;
                self.backend.create_tag(tag, commit)?;
            }
            None => self.backend.create_tag(tag, commit)?,
        }

        let remote = &self.config.remote;
        let reference = format!("refs/tags/{}", tag);
        match self.remote_tag_commit(tag)? {
            Some(existing) if existing == commit => return Ok(()),
            Some(_) => self.backend.force_push_ref(remote, &reference)?,
            None => self.backend.push_ref(remote, &reference)?,
        }

        match self.remote_tag_commit(tag)? {
            Some(existing) if existing == commit => Ok(()),
            _ => Err(BranchError::TransientNetwork {
                command: "ls-remote".to_string(),
                stderr: format!("tag '{}' not visible on {} after push", tag, remote),
            }),
        }
    }

    fn remote_tag_commit(&self, tag: &str) -> Result<Option<String>> {
        Ok(self
            .backend
            .remote_tags(&self.config.remote, &[tag])?
            .into_iter()
            .find(|(name, _)| name == tag)
            .map(|(_, commit)| commit))
    }

    /// Best-effort removal of a stale state tag
    fn remove_tag(&self, tag: &str, propagate_remote: bool, warnings: &mut Vec<String>) {
        if self.backend.rev_parse(&format!("refs/tags/{}", tag)).is_some() {
            if let Err(e) = self.backend.delete_tag(tag) {
                let message = format!("could not delete local tag '{}': {}", tag, e);
                warn!("{}", message);
                warnings.push(message);
            }
        }
        if !propagate_remote {
            return;
        }

        let remote = &self.config.remote;
        let result = self.remote_tag_commit(tag).and_then(|found| match found {
            Some(_) => self
                .backend
                .push_delete_ref(remote, &format!("refs/tags/{}", tag)),
            None => Ok(()),
        });
        if let Err(e) = result {
            let message = format!("could not delete tag '{}' on {}: {}", tag, remote, e);
            warn!("{}", message);
            warnings.push(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::{FailPoint, MemoryBackend};
    use crate::engine::error::ErrorKind;
    use crate::engine::state::StateResolver;

    fn repo() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.add_remote("origin");
        backend.branch("develop", "main");
        backend.branch("feature/login", "develop");
        backend.commit_on("feature/login", "Bob", 2);
        backend.publish("origin", "feature/login");
        backend
    }

    #[test]
    fn test_unknown_rejected() {
        let backend = repo();
        let config = Config::default();
        let mutator = StateMutator::new(&backend, &config);

        assert!(matches!(
            mutator.set_state("feature/login", BranchState::Unknown, true),
            Err(BranchError::InvalidState(_))
        ));
        assert!(matches!(
            mutator.set_state_str("feature/login", "shipped", true),
            Err(BranchError::InvalidState(_))
        ));
    }

    #[test]
    fn test_merged_creates_and_pushes_tag() {
        let backend = repo();
        let config = Config::default();
        let mutator = StateMutator::new(&backend, &config);
        let tip = backend.rev_parse("feature/login").unwrap();

        let outcome = mutator.set_state("feature/login", BranchState::Merged, true).unwrap();
        assert_eq!(outcome.commit, tip);
        assert!(!outcome.imprecise_target);
        assert_eq!(outcome.tag.as_deref(), Some("merged-feature/login"));
        assert_eq!(backend.remote_tag("origin", "merged-feature/login"), Some(tip.clone()));
        assert_eq!(
            backend.show_note("commits", &tip).unwrap().as_deref(),
            Some("branch_state:MERGED")
        );
    }

    #[test]
    fn test_local_only_writes_note_without_tag() {
        let backend = repo();
        let config = Config::default();
        let mutator = StateMutator::new(&backend, &config);

        let outcome = mutator.set_state("feature/login", BranchState::Deleted, false).unwrap();
        assert!(outcome.tag.is_none());
        assert!(backend.local_tag("deleted-feature/login").is_none());
        assert!(backend.remote_tag("origin", "deleted-feature/login").is_none());

        let resolver = StateResolver::new(&backend, &config);
        assert_eq!(resolver.resolve("feature/login"), BranchState::Deleted);
    }

    #[test]
    fn test_push_failure_is_fatal_but_note_survives() {
        let backend = repo();
        backend.fail(FailPoint::Push);
        let config = Config::default();
        let mutator = StateMutator::new(&backend, &config);

        let result = mutator.set_state("feature/login", BranchState::Merged, true);
        assert!(result.unwrap_err().is_transient());
        assert!(backend.remote_tag("origin", "merged-feature/login").is_none());

        let resolver = StateResolver::new(&backend, &config);
        assert_eq!(resolver.resolve("feature/login"), BranchState::Merged);
    }

    #[test]
    fn test_switching_state_swaps_tags() {
        let backend = repo();
        let config = Config::default();
        let mutator = StateMutator::new(&backend, &config);

        mutator.set_state("feature/login", BranchState::Merged, true).unwrap();
        mutator.set_state("feature/login", BranchState::Deleted, true).unwrap();

        assert!(backend.local_tag("merged-feature/login").is_none());
        assert!(backend.remote_tag("origin", "merged-feature/login").is_none());
        assert!(backend.remote_tag("origin", "deleted-feature/login").is_some());

        let resolver = StateResolver::new(&backend, &config);
        assert_eq!(resolver.resolve("feature/login"), BranchState::Deleted);
    }

    #[test]
    fn test_failed_swap_keeps_previous_marker() {
        let backend = repo();
        let config = Config::default();
        let mutator = StateMutator::new(&backend, &config);
        mutator.set_state("feature/login", BranchState::Merged, true).unwrap();

        backend.fail(FailPoint::Push);
        assert!(mutator.set_state("feature/login", BranchState::Deleted, true).is_err());
        assert!(backend.remote_tag("origin", "merged-feature/login").is_some());
        assert!(backend.remote_tag("origin", "deleted-feature/login").is_none());
    }

    #[test]
    fn test_wip_clears_tags() {
        let backend = repo();
        let config = Config::default();
        let mutator = StateMutator::new(&backend, &config);
        mutator.set_state("feature/login", BranchState::Merged, true).unwrap();

        let outcome = mutator.set_state("feature/login", BranchState::Wip, true).unwrap();
        assert!(outcome.warnings.is_empty());
        assert!(backend.local_tag("merged-feature/login").is_none());
        assert!(backend.remote_tag("origin", "merged-feature/login").is_none());

        let resolver = StateResolver::new(&backend, &config);
        assert_eq!(resolver.resolve("feature/login"), BranchState::Wip);
    }

    #[test]
    fn test_remote_delete_failure_is_warning() {
        let backend = repo();
        let config = Config::default();
        let mutator = StateMutator::new(&backend, &config);
        mutator.set_state("feature/login", BranchState::Merged, true).unwrap();

        backend.fail(FailPoint::Push);
        let outcome = mutator.set_state("feature/login", BranchState::Wip, true).unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert!(backend.remote_tag("origin", "merged-feature/login").is_some());
    }

    #[test]
    fn test_note_failure_is_warning() {
        let backend = repo();
        backend.fail(FailPoint::NoteAdd);
        let config = Config::default();
        let mutator = StateMutator::new(&backend, &config);

        let outcome = mutator.set_state("feature/login", BranchState::Merged, true).unwrap();
        assert!(!outcome.note_written);
        assert_eq!(outcome.warnings.len(), 1);

        let outcome = mutator.set_state("feature/login", BranchState::Wip, false).unwrap();
        assert_eq!(outcome.warnings.len(), 2);
    }

    #[test]
    fn test_note_keeps_other_keys() {
        let backend = repo();
        let config = Config::default();
        let tip = backend.rev_parse("feature/login").unwrap();
        backend.add_note("commits", &tip, "forced_context:HYBRID").unwrap();

        let mutator = StateMutator::new(&backend, &config);
        mutator.set_state("feature/login", BranchState::Wip, false).unwrap();
        assert_eq!(
            backend.show_note("commits", &tip).unwrap().as_deref(),
            Some("forced_context:HYBRID\nbranch_state:WIP")
        );
    }

    #[test]
    fn test_remote_only_branch_uses_tracking_ref() {
        let backend = repo();
        let tip = backend.rev_parse("feature/login").unwrap();
        backend.drop_branch("feature/login");
        let config = Config::default();
        let mutator = StateMutator::new(&backend, &config);

        let outcome = mutator.set_state("feature/login", BranchState::Deleted, true).unwrap();
        assert_eq!(outcome.commit, tip);
        assert!(!outcome.imprecise_target);
        assert_eq!(backend.remote_tag("origin", "deleted-feature/login"), Some(tip));
    }

    #[test]
    fn test_missing_ref_falls_back_to_head() {
        let backend = repo();
        let config = Config::default();
        let mutator = StateMutator::new(&backend, &config);

        let outcome = mutator.set_state("feature/ghost", BranchState::Deleted, true).unwrap();
        assert!(outcome.imprecise_target);
        assert_eq!(outcome.commit, backend.rev_parse("HEAD").unwrap());
    }

    #[test]
    fn test_setting_same_state_twice_is_stable() {
        let backend = repo();
        let config = Config::default();
        let mutator = StateMutator::new(&backend, &config);

        mutator.set_state("feature/login", BranchState::Merged, true).unwrap();
        let again = mutator.set_state("feature/login", BranchState::Merged, true).unwrap();
        assert!(again.warnings.is_empty());
        assert!(backend.remote_tag("origin", "merged-feature/login").is_some());
    }

    #[test]
    fn test_stale_tag_is_repointed() {
        let backend = repo();
        let config = Config::default();
        let mutator = StateMutator::new(&backend, &config);
        mutator.set_state("feature/login", BranchState::Merged, true).unwrap();

        backend.commit_on("feature/login", "Bob", 1);
        let new_tip = backend.rev_parse("feature/login").unwrap();
        mutator.set_state("feature/login", BranchState::Merged, true).unwrap();

        assert_eq!(backend.local_tag("merged-feature/login"), Some(new_tip.clone()));
        assert_eq!(backend.remote_tag("origin", "merged-feature/login"), Some(new_tip));
        assert!(backend.pushes().contains(&"+refs/tags/merged-feature/login".to_string()));
        assert!(!backend.pushes().iter().any(|p| p.starts_with(':')));
    }

    #[test]
    fn test_failed_repoint_keeps_old_remote_tag() {
        let backend = repo();
        let config = Config::default();
        let mutator = StateMutator::new(&backend, &config);
        mutator.set_state("feature/login", BranchState::Merged, true).unwrap();
        let old_tip = backend.rev_parse("feature/login").unwrap();

        backend.commit_on("feature/login", "Bob", 1);
        backend.fail(FailPoint::Push);
        assert!(mutator.set_state("feature/login", BranchState::Merged, true).is_err());
        assert_eq!(backend.remote_tag("origin", "merged-feature/login"), Some(old_tip));
    }

    #[test]
    fn test_transient_push_failures_are_retried() {
        let backend = repo();
        backend.fail_times(FailPoint::Push, 2);
        let config = Config {
            marker_attempts: 3,
            ..Config::default()
        };
        let mutator = StateMutator::new(&backend, &config);

        let outcome = mutator.set_state("feature/login", BranchState::Merged, true).unwrap();
        assert_eq!(outcome.tag.as_deref(), Some("merged-feature/login"));
        let tip = backend.rev_parse("feature/login").unwrap();
        assert_eq!(backend.remote_tag("origin", "merged-feature/login"), Some(tip));
    }

    #[test]
    fn test_single_attempt_gives_up() {
        let backend = repo();
        backend.fail_times(FailPoint::Push, 1);
        let config = Config {
            marker_attempts: 1,
            ..Config::default()
        };
        let mutator = StateMutator::new(&backend, &config);

        let err = mutator.set_state("feature/login", BranchState::Merged, true).unwrap_err();
        assert!(err.is_transient());
        assert!(backend.remote_tag("origin", "merged-feature/login").is_none());

        // The armed failure is spent; a second call goes through
        assert!(mutator.set_state("feature/login", BranchState::Merged, true).is_ok());
    }

    #[test]
    fn test_unverified_push_is_retried() {
        let backend = repo();
        backend.fail_times(FailPoint::PushLost, 1);
        let config = Config {
            marker_attempts: 2,
            ..Config::default()
        };
        let mutator = StateMutator::new(&backend, &config);

        mutator.set_state("feature/login", BranchState::Merged, true).unwrap();
        assert!(backend.remote_tag("origin", "merged-feature/login").is_some());

        let backend = repo();
        backend.fail_times(FailPoint::PushLost, 1);
        let config = Config {
            marker_attempts: 1,
            ..Config::default()
        };
        let mutator = StateMutator::new(&backend, &config);
        let err = mutator.set_state("feature/login", BranchState::Merged, true).unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("not visible"));
    }

    #[test]
    fn test_local_tag_failure_is_not_retried() {
        let backend = repo();
        backend.fail_times(FailPoint::TagCreate, 1);
        let config = Config {
            marker_attempts: 3,
            ..Config::default()
        };
        let mutator = StateMutator::new(&backend, &config);

        let err = mutator.set_state("feature/login", BranchState::Merged, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert!(backend.remote_tag("origin", "merged-feature/login").is_none());
        assert!(backend.pushes().is_empty());
    }
}
