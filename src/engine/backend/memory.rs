//! In-memory git backend
//!
//! A small commit graph with branches, tags, notes and remotes held in a
//! `RefCell`. Used by unit tests and for dry experiments; failure points can
//! be armed to simulate unreachable remotes or rejected writes.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{AheadBehind, BranchScope, CommitSummary, GitBackend};
use crate::engine::error::{BranchError, Result};

/// Operations that can be forced to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Fetch,
    Push,
    LsRemote,
    NoteAdd,
    TagCreate,
    Merge,
    ListBranches,
    Pull,
    /// Push reports success but the remote never sees the update
    PushLost,
}

#[derive(Debug, Clone)]
struct Commit {
    parents: Vec<String>,
    author: String,
}

#[derive(Debug, Default)]
struct RemoteState {
    branches: BTreeMap<String, String>,
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct Repo {
    commits: HashMap<String, Commit>,
    next_commit: u64,
    branches: BTreeMap<String, String>,
    head: Option<String>,
    tags: BTreeMap<String, String>,
    notes: HashMap<(String, String), String>,
    remotes: BTreeMap<String, RemoteState>,
    upstreams: HashSet<String>,
    files: HashSet<String>,
    dirty: bool,
    /// Armed failures; `None` fails every call, `Some(n)` the next `n` calls
    failures: HashMap<FailPoint, Option<u32>>,
    /// Refspecs of every push that reached a remote
    pushes: Vec<String>,
}

impl Repo {
    fn new_commit(&mut self, parents: Vec<String>, author: &str) -> String {
        self.next_commit += 1;
        let hash = format!("{:040x}", self.next_commit);
        self.commits.insert(
            hash.clone(),
            Commit {
                parents,
                author: author.to_string(),
            },
        );
        hash
    }

    fn resolve(&self, reference: &str) -> Option<String> {
        if reference == "HEAD" {
            return self.head.as_ref().and_then(|b| self.branches.get(b)).cloned();
        }
        if let Some(name) = reference.strip_prefix("refs/heads/") {
            return self.branches.get(name).cloned();
        }
        if let Some(name) = reference.strip_prefix("refs/tags/") {
            return self.tags.get(name).cloned();
        }
        if let Some(rest) = reference.strip_prefix("refs/remotes/") {
            return self.resolve_remote_ref(rest);
        }
        if let Some(commit) = self.branches.get(reference) {
            return Some(commit.clone());
        }
        if let Some(commit) = self.tags.get(reference) {
            return Some(commit.clone());
        }
        if let Some(commit) = self.resolve_remote_ref(reference) {
            return Some(commit);
        }
        self.commits.contains_key(reference).then(|| reference.to_string())
    }

    fn resolve_remote_ref(&self, qualified: &str) -> Option<String> {
        let (remote, branch) = qualified.split_once('/')?;
        self.remotes.get(remote)?.branches.get(branch).cloned()
    }

    fn ancestors(&self, commit: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![commit.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(c) = self.commits.get(&current) {
                stack.extend(c.parents.iter().cloned());
            }
        }
        seen
    }

    fn fail(&mut self, point: FailPoint, command: &str) -> Result<()> {
        match self.failures.get_mut(&point) {
            None => return Ok(()),
            Some(None) => {}
            Some(Some(remaining)) => {
                *remaining -= 1;
                if *remaining == 0 {
                    self.failures.remove(&point);
                }
            }
        }
        let stderr = format!("simulated failure: {:?}", point);
        match point {
            FailPoint::Fetch | FailPoint::Push | FailPoint::LsRemote | FailPoint::Pull => {
                Err(BranchError::TransientNetwork {
                    command: command.to_string(),
                    stderr,
                })
            }
            _ => Err(BranchError::Backend {
                command: command.to_string(),
                stderr,
            }),
        }
    }

    fn remote(&self, name: &str, command: &str) -> Result<&RemoteState> {
        self.remotes.get(name).ok_or_else(|| BranchError::TransientNetwork {
            command: command.to_string(),
            stderr: format!("'{}' does not appear to be a git repository", name),
        })
    }

    fn remote_mut(&mut self, name: &str, command: &str) -> Result<&mut RemoteState> {
        self.remotes.get_mut(name).ok_or_else(|| BranchError::TransientNetwork {
            command: command.to_string(),
            stderr: format!("'{}' does not appear to be a git repository", name),
        })
    }
}

fn glob_match(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
    }
}

fn backend_err(command: &str, stderr: impl Into<String>) -> BranchError {
    BranchError::Backend {
        command: command.to_string(),
        stderr: stderr.into(),
    }
}

/// Fake repository with a single initial commit on `main`
#[derive(Debug)]
pub struct MemoryBackend {
    repo: RefCell<Repo>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let mut repo = Repo::default();
        let root = repo.new_commit(Vec::new(), "Alice");
        repo.branches.insert("main".to_string(), root);
        repo.head = Some("main".to_string());
        Self {
            repo: RefCell::new(repo),
        }
    }

    /// Add an empty remote
    pub fn add_remote(&self, name: &str) {
        self.repo
            .borrow_mut()
            .remotes
            .insert(name.to_string(), RemoteState::default());
    }

    /// Create a branch at the tip of `from` without switching to it
    pub fn branch(&self, name: &str, from: &str) {
        let mut repo = self.repo.borrow_mut();
        if let Some(commit) = repo.resolve(from) {
            repo.branches.insert(name.to_string(), commit);
        }
    }

    /// Add `count` commits by `author` on top of a branch
    pub fn commit_on(&self, branch: &str, author: &str, count: usize) {
        let mut repo = self.repo.borrow_mut();
        for _ in 0..count {
            let parent = repo.branches.get(branch).cloned();
            let commit = repo.new_commit(parent.into_iter().collect(), author);
            repo.branches.insert(branch.to_string(), commit);
        }
    }

    /// Publish a local branch to a remote without touching upstream config
    pub fn publish(&self, remote: &str, branch: &str) {
        let mut repo = self.repo.borrow_mut();
        if let Some(commit) = repo.branches.get(branch).cloned() {
            if let Some(r) = repo.remotes.get_mut(remote) {
                r.branches.insert(branch.to_string(), commit);
            }
        }
    }

    /// Remove a local branch without any bookkeeping
    pub fn drop_branch(&self, name: &str) {
        self.repo.borrow_mut().branches.remove(name);
    }

    pub fn add_file(&self, relative: &str) {
        self.repo.borrow_mut().files.insert(relative.to_string());
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.repo.borrow_mut().dirty = dirty;
    }

    pub fn fail(&self, point: FailPoint) {
        self.repo.borrow_mut().failures.insert(point, None);
    }

    /// Fail only the next `times` calls that hit `point`
    pub fn fail_times(&self, point: FailPoint, times: u32) {
        if times > 0 {
            self.repo.borrow_mut().failures.insert(point, Some(times));
        }
    }

    pub fn recover(&self, point: FailPoint) {
        self.repo.borrow_mut().failures.remove(&point);
    }

    /// Tag as seen on the remote
    pub fn remote_tag(&self, remote: &str, name: &str) -> Option<String> {
        self.repo
            .borrow()
            .remotes
            .get(remote)
            .and_then(|r| r.tags.get(name).cloned())
    }

    /// Place a tag directly on the remote, as another clone would
    pub fn put_remote_tag(&self, remote: &str, name: &str, commit: &str) {
        if let Some(r) = self.repo.borrow_mut().remotes.get_mut(remote) {
            r.tags.insert(name.to_string(), commit.to_string());
        }
    }

    pub fn local_tag(&self, name: &str) -> Option<String> {
        self.repo.borrow().tags.get(name).cloned()
    }

    /// Advance a branch on the remote only, as another clone's push would
    pub fn commit_on_remote(&self, remote: &str, branch: &str, author: &str) {
        let mut repo = self.repo.borrow_mut();
        let parent = repo
            .remotes
            .get(remote)
            .and_then(|r| r.branches.get(branch))
            .cloned();
        let commit = repo.new_commit(parent.into_iter().collect(), author);
        if let Some(r) = repo.remotes.get_mut(remote) {
            r.branches.insert(branch.to_string(), commit);
        }
    }

    /// Refspecs pushed so far, in order
    pub fn pushes(&self) -> Vec<String> {
        self.repo.borrow().pushes.clone()
    }

    fn push_tag(&self, remote: &str, tag: &str, force: bool) -> Result<()> {
        let mut repo = self.repo.borrow_mut();
        repo.fail(FailPoint::Push, "push")?;
        let reference = format!("refs/tags/{}", tag);
        let commit = repo
            .tags
            .get(tag)
            .cloned()
            .ok_or_else(|| backend_err("push", format!("src refspec {} does not match any", reference)))?;
        let lost = repo.fail(FailPoint::PushLost, "push").is_err();
        let target = repo.remote_mut(remote, "push")?;
        if let Some(existing) = target.tags.get(tag) {
            if *existing != commit && !force {
                return Err(BranchError::TransientNetwork {
                    command: "push".to_string(),
                    stderr: format!("! [rejected] {} (already exists)", tag),
                });
            }
        }
        if !lost {
            target.tags.insert(tag.to_string(), commit);
        }
        let refspec = if force { format!("+{}", reference) } else { reference };
        repo.pushes.push(refspec);
        Ok(())
    }
}

impl GitBackend for MemoryBackend {
    fn list_branches(&self, scope: &BranchScope) -> Result<Vec<String>> {
        let mut repo = self.repo.borrow_mut();
        repo.fail(FailPoint::ListBranches, "branch")?;
        match scope {
            BranchScope::Local => Ok(repo.branches.keys().cloned().collect()),
            BranchScope::Remote(remote) => Ok(repo
                .remotes
                .get(remote)
                .map(|r| r.branches.keys().cloned().collect())
                .unwrap_or_default()),
        }
    }

    fn branch_exists(&self, name: &str) -> bool {
        self.repo.borrow().branches.contains_key(name)
    }

    fn rev_parse(&self, reference: &str) -> Option<String> {
        self.repo.borrow().resolve(reference)
    }

    fn list_tags(&self, patterns: &[&str]) -> Result<Vec<String>> {
        let repo = self.repo.borrow();
        Ok(repo
            .tags
            .keys()
            .filter(|t| patterns.is_empty() || patterns.iter().any(|p| glob_match(p, t)))
            .cloned()
            .collect())
    }

    fn create_tag(&self, name: &str, commit: &str) -> Result<()> {
        let mut repo = self.repo.borrow_mut();
        repo.fail(FailPoint::TagCreate, "tag")?;
        if repo.tags.contains_key(name) {
            return Err(backend_err("tag", format!("tag '{}' already exists", name)));
        }
        let target = repo
            .resolve(commit)
            .ok_or_else(|| backend_err("tag", format!("Failed to resolve '{}'", commit)))?;
        repo.tags.insert(name.to_string(), target);
        Ok(())
    }

    fn delete_tag(&self, name: &str) -> Result<()> {
        self.repo
            .borrow_mut()
            .tags
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| backend_err("tag", format!("tag '{}' not found.", name)))
    }

    fn show_note(&self, notes_ref: &str, commit: &str) -> Result<Option<String>> {
        let repo = self.repo.borrow();
        let key = (notes_ref.to_string(), commit.to_string());
        Ok(repo.notes.get(&key).cloned())
    }

    fn add_note(&self, notes_ref: &str, commit: &str, payload: &str) -> Result<()> {
        let mut repo = self.repo.borrow_mut();
        repo.fail(FailPoint::NoteAdd, "notes add")?;
        if !repo.commits.contains_key(commit) {
            return Err(backend_err("notes add", format!("failed to resolve '{}'", commit)));
        }
        repo.notes
            .insert((notes_ref.to_string(), commit.to_string()), payload.to_string());
        Ok(())
    }

    fn remove_note(&self, notes_ref: &str, commit: &str) -> Result<()> {
        self.repo
            .borrow_mut()
            .notes
            .remove(&(notes_ref.to_string(), commit.to_string()));
        Ok(())
    }

    fn fetch_tags(&self, remote: &str) -> Result<()> {
        let mut repo = self.repo.borrow_mut();
        repo.fail(FailPoint::Fetch, "fetch")?;
        let incoming: Vec<(String, String)> = repo
            .remote(remote, "fetch")?
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (name, commit) in incoming {
            repo.tags.entry(name).or_insert(commit);
        }
        Ok(())
    }

    fn remote_tags(&self, remote: &str, patterns: &[&str]) -> Result<Vec<(String, String)>> {
        let mut repo = self.repo.borrow_mut();
        repo.fail(FailPoint::LsRemote, "ls-remote")?;
        Ok(repo
            .remote(remote, "ls-remote")?
            .tags
            .iter()
            .filter(|(name, _)| patterns.iter().any(|p| glob_match(p, name)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn push_ref(&self, remote: &str, reference: &str) -> Result<()> {
        if let Some(tag) = reference.strip_prefix("refs/tags/") {
            return self.push_tag(remote, tag, false);
        }
        let mut repo = self.repo.borrow_mut();
        repo.fail(FailPoint::Push, "push")?;
        let branch = reference.strip_prefix("refs/heads/").unwrap_or(reference);
        let commit = repo
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| backend_err("push", format!("src refspec {} does not match any", reference)))?;
        repo.remote_mut(remote, "push")?
            .branches
            .insert(branch.to_string(), commit);
        repo.pushes.push(format!("refs/heads/{}", branch));
        Ok(())
    }

    fn force_push_ref(&self, remote: &str, reference: &str) -> Result<()> {
        match reference.strip_prefix("refs/tags/") {
            Some(tag) => self.push_tag(remote, tag, true),
            None => Err(backend_err("push", format!("forced push of '{}' is not supported", reference))),
        }
    }

    fn push_delete_ref(&self, remote: &str, reference: &str) -> Result<()> {
        let mut repo = self.repo.borrow_mut();
        repo.fail(FailPoint::Push, "push")?;
        let target = repo.remote_mut(remote, "push")?;
        let removed = match reference.strip_prefix("refs/tags/") {
            Some(tag) => target.tags.remove(tag),
            None => target
                .branches
                .remove(reference.strip_prefix("refs/heads/").unwrap_or(reference)),
        };
        if removed.is_none() {
            return Err(BranchError::TransientNetwork {
                command: "push".to_string(),
                stderr: format!("unable to delete '{}': remote ref does not exist", reference),
            });
        }
        repo.pushes.push(format!(":{}", reference));
        Ok(())
    }

    fn pull(&self, remote: &str, branch: &str) -> Result<()> {
        {
            let mut repo = self.repo.borrow_mut();
            repo.fail(FailPoint::Pull, "pull")?;
            let known = repo.remote(remote, "pull")?.branches.contains_key(branch);
            if !known {
                return Err(BranchError::TransientNetwork {
                    command: "pull".to_string(),
                    stderr: format!("couldn't find remote ref {}", branch),
                });
            }
        }
        self.merge(&format!("{}/{}", remote, branch))
    }

    fn push_branch(&self, remote: &str, branch: &str) -> Result<()> {
        self.push_ref(remote, &format!("refs/heads/{}", branch))?;
        self.repo.borrow_mut().upstreams.insert(branch.to_string());
        Ok(())
    }

    fn ahead_behind(&self, base: &str, branch: &str) -> Result<AheadBehind> {
        let repo = self.repo.borrow();
        let base_commit = repo
            .resolve(base)
            .ok_or_else(|| backend_err("rev-list", format!("unknown revision '{}'", base)))?;
        let branch_commit = repo
            .resolve(branch)
            .ok_or_else(|| backend_err("rev-list", format!("unknown revision '{}'", branch)))?;
        let base_set = repo.ancestors(&base_commit);
        let branch_set = repo.ancestors(&branch_commit);
        Ok(AheadBehind {
            ahead: branch_set.difference(&base_set).count() as u32,
            behind: base_set.difference(&branch_set).count() as u32,
        })
    }

    fn checkout(&self, reference: &str) -> Result<()> {
        let mut repo = self.repo.borrow_mut();
        if !repo.branches.contains_key(reference) {
            return Err(backend_err(
                "checkout",
                format!("pathspec '{}' did not match any file(s) known to git", reference),
            ));
        }
        repo.head = Some(reference.to_string());
        Ok(())
    }

    fn create_branch(&self, name: &str) -> Result<()> {
        let mut repo = self.repo.borrow_mut();
        if repo.branches.contains_key(name) {
            return Err(backend_err("checkout", format!("a branch named '{}' already exists", name)));
        }
        let head = repo
            .resolve("HEAD")
            .ok_or_else(|| backend_err("checkout", "HEAD does not point to a commit"))?;
        repo.branches.insert(name.to_string(), head);
        repo.head = Some(name.to_string());
        Ok(())
    }

    fn delete_branch(&self, name: &str, force: bool) -> Result<()> {
        let mut repo = self.repo.borrow_mut();
        if repo.head.as_deref() == Some(name) {
            return Err(backend_err("branch", format!("cannot delete branch '{}' checked out", name)));
        }
        let tip = repo
            .branches
            .get(name)
            .cloned()
            .ok_or_else(|| backend_err("branch", format!("branch '{}' not found", name)))?;
        if !force {
            let head = repo.resolve("HEAD").unwrap_or_default();
            if !repo.ancestors(&head).contains(&tip) {
                return Err(backend_err("branch", format!("the branch '{}' is not fully merged", name)));
            }
        }
        repo.branches.remove(name);
        repo.upstreams.remove(name);
        Ok(())
    }

    fn merge(&self, reference: &str) -> Result<()> {
        let mut repo = self.repo.borrow_mut();
        if repo.fail(FailPoint::Merge, "merge").is_err() {
            return Err(BranchError::MergeFailed {
                branch: reference.to_string(),
                stderr: "CONFLICT (content): Merge conflict".to_string(),
            });
        }
        let head_branch = repo
            .head
            .clone()
            .ok_or_else(|| backend_err("merge", "not on a branch"))?;
        let head = repo
            .resolve("HEAD")
            .ok_or_else(|| backend_err("merge", "HEAD does not point to a commit"))?;
        let other = repo
            .resolve(reference)
            .ok_or_else(|| backend_err("merge", format!("{} - not something we can merge", reference)))?;

        if repo.ancestors(&head).contains(&other) {
            return Ok(());
        }
        let merged = if repo.ancestors(&other).contains(&head) {
            other
        } else {
            let author = repo.commits.get(&head).map(|c| c.author.clone()).unwrap_or_default();
            repo.new_commit(vec![head, other], &author)
        };
        repo.branches.insert(head_branch, merged);
        Ok(())
    }

    fn current_branch(&self) -> Option<String> {
        self.repo.borrow().head.clone()
    }

    fn remotes(&self) -> Result<Vec<String>> {
        Ok(self.repo.borrow().remotes.keys().cloned().collect())
    }

    fn contributor_count(&self) -> Result<usize> {
        let repo = self.repo.borrow();
        let head = repo
            .resolve("HEAD")
            .ok_or_else(|| backend_err("shortlog", "HEAD does not point to a commit"))?;
        let authors: HashSet<&str> = repo
            .ancestors(&head)
            .iter()
            .filter_map(|c| repo.commits.get(c))
            .map(|c| c.author.as_str())
            .collect();
        Ok(authors.len())
    }

    fn commit_count(&self) -> Result<u32> {
        let repo = self.repo.borrow();
        let head = repo
            .resolve("HEAD")
            .ok_or_else(|| backend_err("rev-list", "HEAD does not point to a commit"))?;
        Ok(repo.ancestors(&head).len() as u32)
    }

    fn has_uncommitted_changes(&self) -> Result<bool> {
        Ok(self.repo.borrow().dirty)
    }

    fn has_upstream(&self, branch: &str) -> bool {
        self.repo.borrow().upstreams.contains(branch)
    }

    fn last_commit(&self, branch: &str) -> Option<CommitSummary> {
        let repo = self.repo.borrow();
        let tip = repo.resolve(branch)?;
        let commit = repo.commits.get(&tip)?;
        Some(CommitSummary {
            author: commit.author.clone(),
            relative_date: "just now".to_string(),
        })
    }

    fn path_exists(&self, relative: &str) -> bool {
        self.repo.borrow().files.contains(relative)
    }
}
