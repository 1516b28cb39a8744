//! Branch State Resolver
//!
//! Resolution walks an ordered list of strategies and stops at the first
//! one that produces a state:
//!
//! 1. remote state tags (`merged-<branch>`, then `deleted-<branch>`)
//! 2. the `branch_state` note on the branch tip
//! 3. unique-commit count against the branch's base
//!
//! Strategies never fail; a backend error inside one is logged and treated
//! as "no match", so callers always get an answer, possibly `UNKNOWN`.
//! Resolution only reads. Remote tags are brought in by the separate
//! [`StateResolver::refresh_remote_markers`] call.

use serde::Serialize;
use tracing::{debug, warn};

use super::{BranchState, NotePayload};
use crate::engine::backend::{CommitSummary, GitBackend};
use crate::engine::branch_types::{base_candidates, category_of};
use crate::engine::config::Config;

/// What a strategy can see while resolving
pub struct ResolveContext<'a> {
    pub backend: &'a dyn GitBackend,
    pub config: &'a Config,
}

pub trait ResolverStrategy {
    fn name(&self) -> &'static str;

    /// `Some(state)` when this tier has an answer for the branch
    fn attempt(&self, ctx: &ResolveContext<'_>, branch: &str) -> Option<BranchState>;
}

/// Commit that markers for `branch` attach to: the local tip, or the
/// remote-tracking tip once the local branch is gone
pub fn branch_tip(backend: &dyn GitBackend, config: &Config, branch: &str) -> Option<String> {
    backend
        .rev_parse(&format!("refs/heads/{}", branch))
        .or_else(|| backend.rev_parse(&format!("refs/remotes/{}/{}", config.remote, branch)))
}

/// First existing base for a branch: registry priority, then fallback bases
pub fn resolve_base(backend: &dyn GitBackend, config: &Config, branch: &str) -> Option<String> {
    base_candidates(branch, &config.fallback_bases)
        .into_iter()
        .filter(|base| base != branch)
        .find(|base| backend.branch_exists(base))
}

pub struct RemoteTagStrategy;

impl ResolverStrategy for RemoteTagStrategy {
    fn name(&self) -> &'static str {
        "remote-tag"
    }

    fn attempt(&self, ctx: &ResolveContext<'_>, branch: &str) -> Option<BranchState> {
        for state in [BranchState::Merged, BranchState::Deleted] {
            let Some(tag) = state.tag_name(branch) else {
                continue;
            };
            match ctx.backend.list_tags(&[tag.as_str()]) {
                Ok(tags) if tags.iter().any(|t| *t == tag) => return Some(state),
                Ok(_) => {}
                Err(e) => debug!(branch, tag = %tag, error = %e, "tag lookup failed"),
            }
        }
        None
    }
}

pub struct CommitNoteStrategy;

impl ResolverStrategy for CommitNoteStrategy {
    fn name(&self) -> &'static str {
        "commit-note"
    }

    fn attempt(&self, ctx: &ResolveContext<'_>, branch: &str) -> Option<BranchState> {
        let commit = branch_tip(ctx.backend, ctx.config, branch)?;
        match ctx.backend.show_note(&ctx.config.notes_ref, &commit) {
            Ok(Some(raw)) => NotePayload::parse(&raw).branch_state(),
            Ok(None) => None,
            Err(e) => {
                debug!(branch, error = %e, "note lookup failed");
                None
            }
        }
    }
}

pub struct CommitHeuristicStrategy;

impl ResolverStrategy for CommitHeuristicStrategy {
    fn name(&self) -> &'static str {
        "commit-heuristic"
    }

    fn attempt(&self, ctx: &ResolveContext<'_>, branch: &str) -> Option<BranchState> {
        if !ctx.backend.branch_exists(branch) {
            return None;
        }
        let base = resolve_base(ctx.backend, ctx.config, branch)?;
        match ctx.backend.ahead_behind(&base, branch) {
            Ok(counts) if counts.ahead > 0 => Some(BranchState::Wip),
            Ok(_) => Some(BranchState::Merged),
            Err(e) => {
                debug!(branch, base = %base, error = %e, "commit count failed");
                None
            }
        }
    }
}

/// Full picture of one branch, for status output
#[derive(Debug, Clone, Serialize)]
pub struct BranchInfo {
    pub name: String,
    pub category: Option<String>,
    pub base: Option<String>,
    pub state: BranchState,
    pub unique_commits: u32,
    pub has_upstream: bool,
    pub ahead_of_upstream: u32,
    pub behind_upstream: u32,
    pub last_commit: Option<CommitSummary>,
}

pub struct StateResolver<'a> {
    backend: &'a dyn GitBackend,
    config: &'a Config,
    strategies: Vec<Box<dyn ResolverStrategy>>,
}

impl<'a> StateResolver<'a> {
    pub fn new(backend: &'a dyn GitBackend, config: &'a Config) -> Self {
        Self::with_strategies(
            backend,
            config,
            vec![
                Box::new(RemoteTagStrategy),
                Box::new(CommitNoteStrategy),
                Box::new(CommitHeuristicStrategy),
            ],
        )
    }

    pub fn with_strategies(
        backend: &'a dyn GitBackend,
        config: &'a Config,
        strategies: Vec<Box<dyn ResolverStrategy>>,
    ) -> Self {
        Self {
            backend,
            config,
            strategies,
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Pull state tags from the remote. Failure only means resolution works
    /// from whatever tags are already local.
    pub fn refresh_remote_markers(&self) -> bool {
        match self.backend.fetch_tags(&self.config.remote) {
            Ok(()) => true,
            Err(e) => {
                warn!(remote = %self.config.remote, error = %e, "could not fetch state tags");
                false
            }
        }
    }

    pub fn resolve(&self, branch: &str) -> BranchState {
        let ctx = ResolveContext {
            backend: self.backend,
            config: self.config,
        };
        for strategy in &self.strategies {
            if let Some(state) = strategy.attempt(&ctx, branch) {
                debug!(branch, strategy = strategy.name(), state = %state, "resolved");
                return state;
            }
        }
        debug!(branch, "no strategy matched");
        BranchState::Unknown
    }

    pub fn resolve_base(&self, branch: &str) -> Option<String> {
        resolve_base(self.backend, self.config, branch)
    }

    pub fn describe(&self, branch: &str) -> BranchInfo {
        let base = self.resolve_base(branch);
        let unique_commits = base
            .as_deref()
            .and_then(|b| self.backend.ahead_behind(b, branch).ok())
            .map(|c| c.ahead)
            .unwrap_or(0);

        let has_upstream = self.backend.has_upstream(branch);
        let (ahead_of_upstream, behind_upstream) = if has_upstream {
            let upstream = format!("{}/{}", self.config.remote, branch);
            self.backend
                .ahead_behind(&upstream, branch)
                .map(|c| (c.ahead, c.behind))
                .unwrap_or((0, 0))
        } else {
            (0, 0)
        };

        BranchInfo {
            name: branch.to_string(),
            category: category_of(branch).map(ToOwned::to_owned),
            base,
            state: self.resolve(branch),
            unique_commits,
            has_upstream,
            ahead_of_upstream,
            behind_upstream,
            last_commit: self.backend.last_commit(branch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::{FailPoint, MemoryBackend};

    fn feature_repo(unique: usize) -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.add_remote("origin");
        backend.branch("develop", "main");
        backend.branch("feature/login", "develop");
        backend.commit_on("feature/login", "Bob", unique);
        backend
    }

    #[test]
    fn test_unique_commits_mean_wip() {
        let backend = feature_repo(3);
        let config = Config::default();
        let resolver = StateResolver::new(&backend, &config);
        assert_eq!(resolver.resolve("feature/login"), BranchState::Wip);
    }

    #[test]
    fn test_no_unique_commits_means_merged() {
        let backend = feature_repo(2);
        backend.checkout("develop").unwrap();
        backend.merge("feature/login").unwrap();
        let config = Config::default();
        let resolver = StateResolver::new(&backend, &config);
        assert_eq!(resolver.resolve("feature/login"), BranchState::Merged);
    }

    #[test]
    fn test_remote_tag_beats_note() {
        let backend = feature_repo(1);
        let config = Config::default();
        let tip = backend.rev_parse("feature/login").unwrap();
        backend.add_note("commits", &tip, "branch_state:WIP").unwrap();
        backend.create_tag("merged-feature/login", &tip).unwrap();

        let resolver = StateResolver::new(&backend, &config);
        assert_eq!(resolver.resolve("feature/login"), BranchState::Merged);
    }

    #[test]
    fn test_merged_tag_beats_deleted_tag() {
        let backend = feature_repo(1);
        let config = Config::default();
        let tip = backend.rev_parse("feature/login").unwrap();
        backend.create_tag("deleted-feature/login", &tip).unwrap();
        backend.create_tag("merged-feature/login", &tip).unwrap();

        let resolver = StateResolver::new(&backend, &config);
        assert_eq!(resolver.resolve("feature/login"), BranchState::Merged);
    }

    #[test]
    fn test_note_overrides_heuristic() {
        let backend = feature_repo(0);
        let config = Config::default();
        let tip = backend.rev_parse("feature/login").unwrap();
        backend
            .add_note("commits", &tip, "forced_context:LOCAL\nbranch_state:WIP")
            .unwrap();

        let resolver = StateResolver::new(&backend, &config);
        assert_eq!(resolver.resolve("feature/login"), BranchState::Wip);
    }

    #[test]
    fn test_malformed_note_falls_through() {
        let backend = feature_repo(2);
        let config = Config::default();
        let tip = backend.rev_parse("feature/login").unwrap();
        backend.add_note("commits", &tip, "branch_state:SHIPPED").unwrap();

        let resolver = StateResolver::new(&backend, &config);
        assert_eq!(resolver.resolve("feature/login"), BranchState::Wip);
    }

    #[test]
    fn test_missing_branch_is_unknown() {
        let backend = feature_repo(1);
        let config = Config::default();
        let resolver = StateResolver::new(&backend, &config);
        assert_eq!(resolver.resolve("feature/ghost"), BranchState::Unknown);
    }

    #[test]
    fn test_unresolvable_base_is_unknown() {
        let backend = MemoryBackend::new();
        backend.branch("trunk", "main");
        backend.drop_branch("main");
        backend.branch("feature/x", "trunk");
        let config = Config::default();

        let resolver = StateResolver::new(&backend, &config);
        assert_eq!(resolver.resolve_base("feature/x"), None);
        assert_eq!(resolver.resolve("feature/x"), BranchState::Unknown);
    }

    #[test]
    fn test_failed_fetch_is_not_fatal() {
        let backend = feature_repo(3);
        backend.fail(FailPoint::Fetch);
        let config = Config::default();
        let resolver = StateResolver::new(&backend, &config);

        assert!(!resolver.refresh_remote_markers());
        assert_eq!(resolver.resolve("feature/login"), BranchState::Wip);
    }

    #[test]
    fn test_refresh_brings_in_remote_tags() {
        let backend = feature_repo(3);
        let tip = backend.rev_parse("feature/login").unwrap();
        backend.put_remote_tag("origin", "merged-feature/login", &tip);
        let config = Config::default();
        let resolver = StateResolver::new(&backend, &config);

        assert_eq!(resolver.resolve("feature/login"), BranchState::Wip);
        assert!(resolver.refresh_remote_markers());
        assert_eq!(resolver.resolve("feature/login"), BranchState::Merged);
    }

    #[test]
    fn test_resolution_is_repeatable() {
        let backend = feature_repo(2);
        let config = Config::default();
        let resolver = StateResolver::new(&backend, &config);
        let first = resolver.resolve("feature/login");
        let second = resolver.resolve("feature/login");
        assert_eq!(first, second);
        assert_eq!(backend.list_tags(&[]).unwrap().len(), 0);
    }

    struct AlwaysDeleted;

    impl ResolverStrategy for AlwaysDeleted {
        fn name(&self) -> &'static str {
            "always-deleted"
        }

        fn attempt(&self, _ctx: &ResolveContext<'_>, _branch: &str) -> Option<BranchState> {
            Some(BranchState::Deleted)
        }
    }

    #[test]
    fn test_custom_strategy_order() {
        let backend = feature_repo(3);
        let config = Config::default();
        let resolver = StateResolver::with_strategies(
            &backend,
            &config,
            vec![Box::new(CommitHeuristicStrategy), Box::new(AlwaysDeleted)],
        );
        assert_eq!(resolver.strategy_names(), vec!["commit-heuristic", "always-deleted"]);
        assert_eq!(resolver.resolve("feature/login"), BranchState::Wip);
        assert_eq!(resolver.resolve("feature/ghost"), BranchState::Deleted);
    }

    #[test]
    fn test_describe_branch() {
        let backend = feature_repo(3);
        backend.push_branch("origin", "feature/login").unwrap();
        backend.commit_on("feature/login", "Bob", 1);
        let config = Config::default();
        let resolver = StateResolver::new(&backend, &config);

        let info = resolver.describe("feature/login");
        assert_eq!(info.category.as_deref(), Some("feature"));
        assert_eq!(info.base.as_deref(), Some("develop"));
        assert_eq!(info.unique_commits, 4);
        assert!(info.has_upstream);
        assert_eq!(info.ahead_of_upstream, 1);
        assert_eq!(info.state, BranchState::Wip);
        assert_eq!(info.last_commit.unwrap().author, "Bob");
    }
}
