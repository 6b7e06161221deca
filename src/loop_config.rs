//! Static run configuration read from `config.json` once at runner start.
//!
//! A missing file means defaults: no iteration cap and no test command.
//! Changing the configuration requires restarting the runner.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::control::ControlDirectory;
use crate::error::{RalphError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Program run in the EXECUTING phase
    pub command: String,
    /// Arguments passed to `command`
    pub flags: Vec<String>,
    /// Stop after this many iterations in total
    pub max_iterations: Option<u32>,
    /// Shell command run in the TESTING phase
    pub test_command: Option<String>,
    /// Base prompt, relative to the project root
    pub prompt_file: Option<PathBuf>,
    /// Treat any failed iteration as fatal
    pub fatal_on_failure: bool,
    /// How often to re-check the pause marker while paused
    pub pause_poll_ms: u64,
    /// Extra attempts for a telemetry append before giving up
    pub telemetry_retries: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            flags: vec!["--print".to_string()],
            max_iterations: None,
            test_command: None,
            prompt_file: Some(PathBuf::from("PROMPT.md")),
            fatal_on_failure: false,
            pause_poll_ms: 1000,
            telemetry_retries: 3,
        }
    }
}

impl LoopConfig {
    /// Load `config.json` from the control directory, or defaults if absent.
    pub fn load(dir: &ControlDirectory) -> Result<Self> {
        let path = dir.config_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("No {} found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(RalphError::Config(format!("cannot read {}: {}", path.display(), e)));
            }
        };

        let config = Self::parse(&content)?;
        log::info!("Loaded loop config from: {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| RalphError::Config(format!("invalid config.json: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(RalphError::Config("command must not be empty".to_string()));
        }
        if self.max_iterations == Some(0) {
            return Err(RalphError::Config("max_iterations must be at least 1".to_string()));
        }
        if self.test_command.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(RalphError::Config("test_command must not be blank".to_string()));
        }
        if self.pause_poll_ms == 0 {
            return Err(RalphError::Config("pause_poll_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Whether `completed` iterations exhaust the cap.
    pub fn is_exhausted(&self, completed: u64) -> bool {
        self.max_iterations
            .is_some_and(|max| completed >= u64::from(max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = LoopConfig::load(&ControlDirectory::new(temp.path())).unwrap();
        assert_eq!(config, LoopConfig::default());
        assert_eq!(config.max_iterations, None);
        assert_eq!(config.test_command, None);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config = LoopConfig::parse(r#"{"max_iterations": 2}"#).unwrap();
        assert_eq!(config.max_iterations, Some(2));
        assert_eq!(config.command, "claude");
        assert_eq!(config.pause_poll_ms, 1000);
    }

    #[test]
    fn test_full_config() {
        let config = LoopConfig::parse(
            r#"{
                "command": "codex",
                "flags": ["exec", "--full-auto"],
                "max_iterations": 10,
                "test_command": "cargo test",
                "fatal_on_failure": true
            }"#,
        )
        .unwrap();
        assert_eq!(config.command, "codex");
        assert_eq!(config.flags, vec!["exec", "--full-auto"]);
        assert_eq!(config.test_command.as_deref(), Some("cargo test"));
        assert!(config.fatal_on_failure);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let result = LoopConfig::parse("{not json");
        assert!(matches!(result, Err(RalphError::Config(_))));
    }

    #[test]
    fn test_wrong_type_is_config_error() {
        let result = LoopConfig::parse(r#"{"max_iterations": "many"}"#);
        assert!(matches!(result, Err(RalphError::Config(_))));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(LoopConfig::parse(r#"{"command": "  "}"#).is_err());
        assert!(LoopConfig::parse(r#"{"max_iterations": 0}"#).is_err());
        assert!(LoopConfig::parse(r#"{"test_command": ""}"#).is_err());
        assert!(LoopConfig::parse(r#"{"pause_poll_ms": 0}"#).is_err());
    }

    #[test]
    fn test_unreadable_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let dir = ControlDirectory::new(temp.path());
        // A directory where the file should be cannot be read as a string
        fs::create_dir(dir.config_path()).unwrap();
        assert!(matches!(LoopConfig::load(&dir), Err(RalphError::Config(_))));
    }

    #[test]
    fn test_is_exhausted() {
        let capped = LoopConfig {
            max_iterations: Some(2),
            ..Default::default()
        };
        assert!(!capped.is_exhausted(1));
        assert!(capped.is_exhausted(2));
        assert!(!LoopConfig::default().is_exhausted(u64::MAX));
    }
}
