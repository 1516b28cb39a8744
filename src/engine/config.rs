//! Branchflow Configuration Module
//! Handles loading and validating .branchflow.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = ".branchflow.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write config: {0}")]
    WriteError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Remote that receives the authoritative state tags
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Notes ref (under refs/notes/) holding branch_state annotations
    #[serde(default = "default_notes_ref")]
    pub notes_ref: String,
    /// Long-lived branches that reconciliation never marks
    #[serde(default = "default_integration_branches")]
    pub integration_branches: Vec<String>,
    /// Branches whose presence signals a team workflow
    #[serde(default = "default_context_branches")]
    pub context_branches: Vec<String>,
    /// Bases tried when the branch type registry has no match
    #[serde(default = "default_fallback_bases")]
    pub fallback_bases: Vec<String>,
    #[serde(default = "default_ci_indicators")]
    pub ci_indicators: Vec<String>,
    /// Push/verify attempts when establishing a state tag
    #[serde(default = "default_marker_attempts")]
    pub marker_attempts: u32,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_notes_ref() -> String {
    "commits".to_string()
}

fn default_integration_branches() -> Vec<String> {
    vec!["main".to_string(), "master".to_string(), "develop".to_string()]
}

fn default_context_branches() -> Vec<String> {
    vec!["develop".to_string(), "staging".to_string()]
}

fn default_fallback_bases() -> Vec<String> {
    vec!["main".to_string(), "master".to_string()]
}

fn default_ci_indicators() -> Vec<String> {
    [
        ".github/workflows",
        ".gitlab-ci.yml",
        ".travis.yml",
        "azure-pipelines.yml",
        "bitbucket-pipelines.yml",
        "Jenkinsfile",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_marker_attempts() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            notes_ref: default_notes_ref(),
            integration_branches: default_integration_branches(),
            context_branches: default_context_branches(),
            fallback_bases: default_fallback_bases(),
            ci_indicators: default_ci_indicators(),
            marker_attempts: default_marker_attempts(),
        }
    }
}

impl Config {
    /// Load config from the repository root, falling back to defaults when absent
    pub fn load(repo_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = repo_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&config_path).map_err(|source| {
            ConfigError::ReadError {
                path: config_path.clone(),
                source,
            }
        })?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, repo_dir: &Path) -> Result<(), ConfigError> {
        let config_path = repo_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote.trim().is_empty() {
            return Err(ConfigError::Invalid("remote must not be empty".to_string()));
        }
        if self.notes_ref.trim().is_empty() {
            return Err(ConfigError::Invalid("notes_ref must not be empty".to_string()));
        }
        if self.marker_attempts == 0 {
            return Err(ConfigError::Invalid("marker_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn is_integration_branch(&self, name: &str) -> bool {
        self.integration_branches.iter().any(|b| b == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.remote, "origin");
        assert!(config.is_integration_branch("develop"));
        assert!(!config.is_integration_branch("feature/login"));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"remote": "upstream", "marker_attempts": 5}"#,
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.remote, "upstream");
        assert_eq!(config.marker_attempts, 5);
        assert_eq!(config.notes_ref, "commits");
        assert_eq!(config.fallback_bases, vec!["main", "master"]);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.integration_branches.push("release".to_string());
        config.save(dir.path()).unwrap();

        let loaded = Config::load(dir.path()).unwrap();
        assert!(loaded.is_integration_branch("release"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"marker_attempts": 0}"#).unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(dir.path().join(CONFIG_FILE), "not json").unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(ConfigError::ParseError(_))
        ));
    }
}
