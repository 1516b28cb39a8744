//! Branchflow - branch lifecycle tracking for git repositories
//!
//! Resolves whether a branch is in progress, merged or retired from remote
//! tags, commit notes and commit history, records declared states in both
//! marker stores, and reconciles remote tags with what a clone observes.

pub mod engine;
