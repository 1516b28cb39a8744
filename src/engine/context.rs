//! Context Classifier
//!
//! Picks the operating context (LOCAL, HYBRID or REMOTE) from repository
//! signals and binds it to a static policy profile. A forced context held
//! in a [`ContextStore`] short-circuits detection.

use std::cell::RefCell;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backend::GitBackend;
use super::config::Config;
use super::error::{BranchError, Result};
use super::state::NotePayload;

pub const FORCED_CONTEXT_KEY: &str = "forced_context";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Context {
    Local,
    Hybrid,
    Remote,
}

impl Context {
    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Local => "LOCAL",
            Context::Hybrid => "HYBRID",
            Context::Remote => "REMOTE",
        }
    }

    pub fn profile(&self) -> PolicyProfile {
        match self {
            Context::Local => PolicyProfile {
                validation_level: ValidationLevel::Permissive,
                require_upstream: false,
                require_pr: false,
                protected_branches: &["main", "master"],
                enforce_branch_naming: false,
                require_linear_history: false,
                require_gpg: true,
                auto_push: false,
                allow_direct_push_to_main: true,
                ci_cd_only_main: true,
            },
            Context::Hybrid => PolicyProfile {
                validation_level: ValidationLevel::Moderate,
                require_upstream: true,
                require_pr: false,
                protected_branches: &["main", "master", "develop"],
                enforce_branch_naming: true,
                require_linear_history: false,
                require_gpg: true,
                auto_push: true,
                allow_direct_push_to_main: false,
                ci_cd_only_main: true,
            },
            Context::Remote => PolicyProfile {
                validation_level: ValidationLevel::Strict,
                require_upstream: true,
                require_pr: true,
                protected_branches: &["main", "master", "develop", "staging", "release"],
                enforce_branch_naming: true,
                require_linear_history: true,
                require_gpg: true,
                auto_push: true,
                allow_direct_push_to_main: false,
                ci_cd_only_main: false,
            },
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Context {
    type Err = BranchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "LOCAL" => Ok(Context::Local),
            "HYBRID" => Ok(Context::Hybrid),
            "REMOTE" => Ok(Context::Remote),
            _ => Err(BranchError::InvalidContext(s.to_string())),
        }
    }
}

/// Argument to [`ContextDetector::force`]: a fixed context, or back to detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextOverride {
    Auto,
    Fixed(Context),
}

impl FromStr for ContextOverride {
    type Err = BranchError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("AUTO") {
            Ok(ContextOverride::Auto)
        } else {
            s.parse().map(ContextOverride::Fixed)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    Permissive,
    Moderate,
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyProfile {
    pub validation_level: ValidationLevel,
    pub require_upstream: bool,
    pub require_pr: bool,
    pub protected_branches: &'static [&'static str],
    pub enforce_branch_naming: bool,
    pub require_linear_history: bool,
    pub require_gpg: bool,
    pub auto_push: bool,
    pub allow_direct_push_to_main: bool,
    pub ci_cd_only_main: bool,
}

impl PolicyProfile {
    pub fn is_protected(&self, branch: &str) -> bool {
        self.protected_branches.contains(&branch)
    }
}

/// Repository facts the classifier looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContextSignals {
    pub remote_count: usize,
    pub has_integration_branch: bool,
    pub contributor_count: usize,
    pub has_ci: bool,
}

impl ContextSignals {
    /// First match wins: a solo or unshared repository is LOCAL, CI or a
    /// real team makes it REMOTE, anything in between is HYBRID
    pub fn classify(&self) -> Context {
        if self.remote_count == 0 || !self.has_integration_branch || self.contributor_count < 2 {
            Context::Local
        } else if self.has_ci || self.contributor_count > 2 {
            Context::Remote
        } else {
            Context::Hybrid
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DetectedContext {
    pub context: Context,
    pub forced: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextInfo {
    pub context: Context,
    pub forced: bool,
    pub signals: ContextSignals,
    pub commit_count: u32,
    pub profile: PolicyProfile,
}

/// Storage slot for the forced-context override
pub trait ContextStore {
    /// Raw stored value, if any
    fn load(&self) -> Option<String>;
    fn store(&self, value: Option<Context>) -> Result<()>;
}

/// Keeps the override as a `forced_context:` line in the note on `HEAD`
pub struct NotesContextStore<'a> {
    backend: &'a dyn GitBackend,
    notes_ref: String,
}

impl<'a> NotesContextStore<'a> {
    pub fn new(backend: &'a dyn GitBackend, config: &Config) -> Self {
        Self {
            backend,
            notes_ref: config.notes_ref.clone(),
        }
    }

    fn head(&self) -> Result<String> {
        self.backend.rev_parse("HEAD").ok_or_else(|| BranchError::Backend {
            command: "rev-parse".to_string(),
            stderr: "HEAD does not point to a commit".to_string(),
        })
    }
}

impl ContextStore for NotesContextStore<'_> {
    fn load(&self) -> Option<String> {
        let head = self.backend.rev_parse("HEAD")?;
        let raw = self.backend.show_note(&self.notes_ref, &head).ok()??;
        NotePayload::parse(&raw)
            .get(FORCED_CONTEXT_KEY)
            .map(ToOwned::to_owned)
    }

    fn store(&self, value: Option<Context>) -> Result<()> {
        let head = self.head()?;
        let mut payload = self
            .backend
            .show_note(&self.notes_ref, &head)?
            .map(|raw| NotePayload::parse(&raw))
            .unwrap_or_default();

        match value {
            Some(context) => payload.set(FORCED_CONTEXT_KEY, context.as_str()),
            None => payload.remove(FORCED_CONTEXT_KEY),
        }

        if payload.is_empty() {
            self.backend.remove_note(&self.notes_ref, &head)
        } else {
            self.backend.add_note(&self.notes_ref, &head, &payload.render())
        }
    }
}

/// In-process override slot
#[derive(Debug, Default)]
pub struct MemoryContextStore {
    value: RefCell<Option<String>>,
}

impl MemoryContextStore {
    pub fn with_raw(raw: &str) -> Self {
        Self {
            value: RefCell::new(Some(raw.to_string())),
        }
    }
}

impl ContextStore for MemoryContextStore {
    fn load(&self) -> Option<String> {
        self.value.borrow().clone()
    }

    fn store(&self, value: Option<Context>) -> Result<()> {
        *self.value.borrow_mut() = value.map(|c| c.as_str().to_string());
        Ok(())
    }
}

pub struct ContextDetector<'a> {
    backend: &'a dyn GitBackend,
    config: &'a Config,
    store: &'a dyn ContextStore,
}

impl<'a> ContextDetector<'a> {
    pub fn new(backend: &'a dyn GitBackend, config: &'a Config, store: &'a dyn ContextStore) -> Self {
        Self {
            backend,
            config,
            store,
        }
    }

    pub fn detect(&self) -> DetectedContext {
        if let Some(raw) = self.store.load() {
            match raw.parse::<Context>() {
                Ok(context) => {
                    debug!(context = %context, "using forced context");
                    return DetectedContext {
                        context,
                        forced: true,
                    };
                }
                Err(_) => warn!(value = %raw, "ignoring invalid forced context"),
            }
        }

        let signals = self.signals();
        let context = signals.classify();
        debug!(context = %context, signals = ?signals, "detected context");
        DetectedContext {
            context,
            forced: false,
        }
    }

    pub fn force(&self, value: ContextOverride) -> Result<()> {
        match value {
            ContextOverride::Auto => self.store.store(None),
            ContextOverride::Fixed(context) => self.store.store(Some(context)),
        }
    }

    pub fn signals(&self) -> ContextSignals {
        let remote_count = self
            .backend
            .remotes()
            .map(|r| r.len())
            .unwrap_or_else(|e| {
                warn!(error = %e, "could not list remotes");
                0
            });
        let has_integration_branch = self
            .config
            .context_branches
            .iter()
            .any(|b| self.backend.branch_exists(b));
        // An unreadable history counts as a single author
        let contributor_count = self.backend.contributor_count().unwrap_or(1);
        let has_ci = self
            .config
            .ci_indicators
            .iter()
            .any(|p| self.backend.path_exists(p));

        ContextSignals {
            remote_count,
            has_integration_branch,
            contributor_count,
            has_ci,
        }
    }

    pub fn info(&self) -> ContextInfo {
        let detected = self.detect();
        ContextInfo {
            context: detected.context,
            forced: detected.forced,
            signals: self.signals(),
            commit_count: self.backend.commit_count().unwrap_or(0),
            profile: detected.context.profile(),
        }
    }
}
