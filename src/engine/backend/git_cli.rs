//! Shell-based git backend
//!
//! Runs the `git` executable in the repository's working tree and maps
//! exit codes onto [`BranchError`]. Fetch/push/ls-remote failures are
//! reported as transient network errors.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::{AheadBehind, BranchScope, CommitSummary, GitBackend};
use crate::engine::error::{BranchError, Result};

/// Captured result of one git invocation
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

pub struct GitCli {
    git: PathBuf,
    repo_dir: PathBuf,
}

impl GitCli {
    /// Open the repository containing `path`
    pub fn open(path: &Path) -> Result<Self> {
        let git = which::which("git")?;
        let opened = Self {
            git,
            repo_dir: path.to_path_buf(),
        };
        let toplevel = opened.check("rev-parse", &["rev-parse", "--show-toplevel"])?;
        Ok(Self {
            git: opened.git,
            repo_dir: PathBuf::from(toplevel),
        })
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    /// Build a git command for this repository. Messages are forced to the
    /// C locale because absence checks match on git's English stderr.
    pub fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.git);
        command
            .args(args)
            .current_dir(&self.repo_dir)
            .env("LC_ALL", "C");
        command
    }

    /// Run a git command, capturing output. Never fails; spawn errors are
    /// folded into `stderr`.
    pub fn run(&self, args: &[&str]) -> GitOutput {
        debug!(args = ?args, "git");
        match self.command(args).output() {
            Ok(output) => GitOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            },
            Err(e) => GitOutput {
                success: false,
                stdout: String::new(),
                stderr: e.to_string(),
            },
        }
    }

    fn check(&self, command: &str, args: &[&str]) -> Result<String> {
        let output = self.run(args);
        if output.success {
            Ok(output.stdout)
        } else {
            Err(BranchError::Backend {
                command: command.to_string(),
                stderr: output.stderr,
            })
        }
    }

    fn network(&self, command: &str, args: &[&str]) -> Result<String> {
        let output = self.run(args);
        if output.success {
            Ok(output.stdout)
        } else {
            Err(BranchError::TransientNetwork {
                command: command.to_string(),
                stderr: output.stderr,
            })
        }
    }
}

fn lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

impl GitBackend for GitCli {
    fn list_branches(&self, scope: &BranchScope) -> Result<Vec<String>> {
        match scope {
            BranchScope::Local => {
                let out = self.check(
                    "branch",
                    &["for-each-ref", "--format=%(refname:short)", "refs/heads/"],
                )?;
                Ok(lines(&out))
            }
            BranchScope::Remote(remote) => {
                let prefix = format!("refs/remotes/{}/", remote);
                let out = self.check(
                    "branch",
                    &["for-each-ref", "--format=%(refname)", &prefix],
                )?;
                Ok(lines(&out)
                    .into_iter()
                    .filter_map(|r| r.strip_prefix(&prefix).map(ToOwned::to_owned))
                    .filter(|name| name != "HEAD")
                    .collect())
            }
        }
    }

    fn branch_exists(&self, name: &str) -> bool {
        let reference = format!("refs/heads/{}", name);
        self.run(&["rev-parse", "--verify", "--quiet", &reference]).success
    }

    fn rev_parse(&self, reference: &str) -> Option<String> {
        let spec = format!("{}^{{commit}}", reference);
        let output = self.run(&["rev-parse", "--verify", "--quiet", &spec]);
        (output.success && !output.stdout.is_empty()).then_some(output.stdout)
    }

    fn list_tags(&self, patterns: &[&str]) -> Result<Vec<String>> {
        let mut args = vec!["tag", "-l"];
        args.extend_from_slice(patterns);
        let out = self.check("tag", &args)?;
        Ok(lines(&out))
    }

    fn create_tag(&self, name: &str, commit: &str) -> Result<()> {
        self.check("tag", &["tag", name, commit]).map(|_| ())
    }

    fn delete_tag(&self, name: &str) -> Result<()> {
        self.check("tag", &["tag", "-d", name]).map(|_| ())
    }

    fn show_note(&self, notes_ref: &str, commit: &str) -> Result<Option<String>> {
        let ref_arg = format!("--ref={}", notes_ref);
        let output = self.run(&["notes", &ref_arg, "show", commit]);
        if output.success {
            return Ok(Some(output.stdout));
        }
        if output.stderr.contains("no note found") {
            return Ok(None);
        }
        Err(BranchError::Backend {
            command: "notes show".to_string(),
            stderr: output.stderr,
        })
    }

    fn add_note(&self, notes_ref: &str, commit: &str, payload: &str) -> Result<()> {
        let ref_arg = format!("--ref={}", notes_ref);
        self.check(
            "notes add",
            &["notes", &ref_arg, "add", "-f", "-m", payload, commit],
        )
        .map(|_| ())
    }

    fn remove_note(&self, notes_ref: &str, commit: &str) -> Result<()> {
        let ref_arg = format!("--ref={}", notes_ref);
        self.check(
            "notes remove",
            &["notes", &ref_arg, "remove", "--ignore-missing", commit],
        )
        .map(|_| ())
    }

    fn fetch_tags(&self, remote: &str) -> Result<()> {
        self.network("fetch", &["fetch", remote, "--tags"]).map(|_| ())
    }

    fn remote_tags(&self, remote: &str, patterns: &[&str]) -> Result<Vec<(String, String)>> {
        let refs: Vec<String> = patterns.iter().map(|p| format!("refs/tags/{}", p)).collect();
        let mut args = vec!["ls-remote", "--tags", remote];
        args.extend(refs.iter().map(String::as_str));
        let out = self.network("ls-remote", &args)?;

        Ok(lines(&out)
            .iter()
            .filter_map(|line| {
                let (commit, reference) = line.split_once('\t')?;
                let name = reference.strip_prefix("refs/tags/")?;
                if name.ends_with("^{}") {
                    return None;
                }
                patterns
                    .contains(&name)
                    .then(|| (name.to_string(), commit.to_string()))
            })
            .collect())
    }

    fn push_ref(&self, remote: &str, reference: &str) -> Result<()> {
        self.network("push", &["push", remote, reference]).map(|_| ())
    }

    fn force_push_ref(&self, remote: &str, reference: &str) -> Result<()> {
        let refspec = format!("+{}", reference);
        self.network("push", &["push", remote, &refspec]).map(|_| ())
    }

    fn push_delete_ref(&self, remote: &str, reference: &str) -> Result<()> {
        let refspec = format!(":{}", reference);
        self.network("push", &["push", remote, &refspec]).map(|_| ())
    }

    fn push_branch(&self, remote: &str, branch: &str) -> Result<()> {
        self.network("push", &["push", "-u", remote, branch]).map(|_| ())
    }

    fn pull(&self, remote: &str, branch: &str) -> Result<()> {
        self.network("pull", &["pull", "--no-edit", remote, branch]).map(|_| ())
    }

    fn ahead_behind(&self, base: &str, branch: &str) -> Result<AheadBehind> {
        let range = format!("{}...{}", base, branch);
        let out = self.check("rev-list", &["rev-list", "--left-right", "--count", &range])?;
        let parts: Vec<&str> = out.split_whitespace().collect();
        match parts.as_slice() {
            [behind, ahead] => {
                let parse = |s: &str| {
                    s.parse::<u32>().map_err(|_| BranchError::Backend {
                        command: "rev-list".to_string(),
                        stderr: format!("unexpected count output: {}", out),
                    })
                };
                Ok(AheadBehind {
                    ahead: parse(ahead)?,
                    behind: parse(behind)?,
                })
            }
            _ => Err(BranchError::Backend {
                command: "rev-list".to_string(),
                stderr: format!("unexpected count output: {}", out),
            }),
        }
    }

    fn checkout(&self, reference: &str) -> Result<()> {
        self.check("checkout", &["checkout", reference]).map(|_| ())
    }

    fn create_branch(&self, name: &str) -> Result<()> {
        self.check("checkout", &["checkout", "-b", name]).map(|_| ())
    }

    fn delete_branch(&self, name: &str, force: bool) -> Result<()> {
        let flag = if force { "-D" } else { "-d" };
        self.check("branch", &["branch", flag, name]).map(|_| ())
    }

    fn merge(&self, reference: &str) -> Result<()> {
        let output = self.run(&["merge", "--no-edit", reference]);
        if output.success {
            Ok(())
        } else {
            let stderr = if output.stderr.is_empty() {
                output.stdout
            } else {
                output.stderr
            };
            Err(BranchError::MergeFailed {
                branch: reference.to_string(),
                stderr,
            })
        }
    }

    fn current_branch(&self) -> Option<String> {
        let output = self.run(&["rev-parse", "--abbrev-ref", "HEAD"]);
        (output.success && output.stdout != "HEAD" && !output.stdout.is_empty())
            .then_some(output.stdout)
    }

    fn remotes(&self) -> Result<Vec<String>> {
        let out = self.check("remote", &["remote"])?;
        Ok(lines(&out))
    }

    fn contributor_count(&self) -> Result<usize> {
        let out = self.check("shortlog", &["shortlog", "-sn", "HEAD"])?;
        Ok(lines(&out).len())
    }

    fn commit_count(&self) -> Result<u32> {
        let out = self.check("rev-list", &["rev-list", "--count", "HEAD"])?;
        out.parse().map_err(|_| BranchError::Backend {
            command: "rev-list".to_string(),
            stderr: format!("unexpected count output: {}", out),
        })
    }

    fn has_uncommitted_changes(&self) -> Result<bool> {
        let out = self.check("status", &["status", "--porcelain"])?;
        Ok(!out.is_empty())
    }

    fn has_upstream(&self, branch: &str) -> bool {
        let spec = format!("{}@{{upstream}}", branch);
        self.run(&["rev-parse", "--abbrev-ref", &spec]).success
    }

    fn last_commit(&self, branch: &str) -> Option<CommitSummary> {
        let output = self.run(&["log", "-1", "--format=%an%x09%ar", branch]);
        if !output.success {
            return None;
        }
        let (author, relative_date) = output.stdout.split_once('\t')?;
        Some(CommitSummary {
            author: author.to_string(),
            relative_date: relative_date.to_string(),
        })
    }

    fn path_exists(&self, relative: &str) -> bool {
        self.repo_dir.join(relative).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_skips_blank() {
        assert_eq!(lines("a\n\n  b  \n"), vec!["a", "b"]);
        assert!(lines("").is_empty());
    }

    #[test]
    fn test_commands_run_in_c_locale() {
        let cli = GitCli {
            git: PathBuf::from("git"),
            repo_dir: PathBuf::from("/tmp"),
        };
        let command = cli.command(&["notes", "show", "HEAD"]);
        let lc_all = command
            .get_envs()
            .find(|(key, _)| *key == "LC_ALL")
            .and_then(|(_, value)| value);
        assert_eq!(lc_all, Some(std::ffi::OsStr::new("C")));
        assert_eq!(command.get_current_dir(), Some(Path::new("/tmp")));
    }

    #[test]
    fn test_open_outside_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        // Only meaningful when git is installed; otherwise GitNotFound is also an error
        assert!(GitCli::open(dir.path()).is_err());
    }
}
