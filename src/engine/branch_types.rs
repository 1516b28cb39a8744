//! Branch Type Registry
//!
//! Static table mapping a branch category (the prefix before the first `/`)
//! to the bases it is normally cut from, in priority order.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BranchType {
    pub name: &'static str,
    pub description: &'static str,
    pub base_priority: &'static [&'static str],
}

pub const BRANCH_TYPES: &[BranchType] = &[
    BranchType {
        name: "feature",
        description: "New features and functionality",
        base_priority: &["develop", "main"],
    },
    BranchType {
        name: "fix",
        description: "Bug fixes",
        base_priority: &["develop", "main"],
    },
    BranchType {
        name: "hotfix",
        description: "Urgent production fixes",
        base_priority: &["main", "master"],
    },
    BranchType {
        name: "docs",
        description: "Documentation changes",
        base_priority: &["develop", "main"],
    },
    BranchType {
        name: "refactor",
        description: "Refactoring without functional changes",
        base_priority: &["develop", "main"],
    },
    BranchType {
        name: "test",
        description: "Adding or improving tests",
        base_priority: &["develop", "main"],
    },
    BranchType {
        name: "chore",
        description: "Maintenance and build tasks",
        base_priority: &["develop", "main"],
    },
];

/// Look up a registered branch type by name
pub fn lookup(name: &str) -> Option<&'static BranchType> {
    BRANCH_TYPES.iter().find(|t| t.name == name)
}

/// Category of a branch name: everything before the first `/`
pub fn category_of(branch: &str) -> Option<&str> {
    branch
        .split_once('/')
        .map(|(category, _)| category)
        .filter(|c| !c.is_empty())
}

/// Candidate bases for a branch, registry priority first then `fallback`,
/// without duplicates
pub fn base_candidates(branch: &str, fallback: &[String]) -> Vec<String> {
    let mut candidates: Vec<String> = category_of(branch)
        .and_then(lookup)
        .map(|t| t.base_priority.iter().map(|b| b.to_string()).collect())
        .unwrap_or_default();

    for base in fallback {
        if !candidates.contains(base) {
            candidates.push(base.clone());
        }
    }
    candidates
}

/// Normalize a free-form description into a branch name segment
pub fn clean_branch_name(description: &str) -> String {
    let kept: String = description
        .to_lowercase()
        .chars()
        .filter_map(|ch| {
            if ch.is_whitespace() {
                Some('-')
            } else if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_' {
                Some(ch)
            } else {
                None
            }
        })
        .collect();

    // Runs of two or more delimiters collapse to a single dash
    let mut cleaned = String::with_capacity(kept.len());
    let mut run = String::new();
    for ch in kept.chars() {
        if ch == '-' || ch == '_' {
            run.push(ch);
            continue;
        }
        match run.len() {
            0 => {}
            1 => cleaned.push_str(&run),
            _ => cleaned.push('-'),
        }
        run.clear();
        cleaned.push(ch);
    }

    cleaned.trim_matches(|c| c == '-' || c == '_').to_string()
}
