use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ralph::control::DEFAULT_DIR_NAME;
use ralph::dashboard::DashboardConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    /// Control directory name inside each project
    pub control_dir: String,
    pub dashboard: DashboardSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub username: Option<String>,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            base_url: ralph::dashboard::client::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 10,
            username: None,
        }
    }
}

impl DashboardSettings {
    pub fn client_config(&self) -> DashboardConfig {
        DashboardConfig {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            control_dir: DEFAULT_DIR_NAME.to_string(),
            dashboard: DashboardSettings::default(),
        }
    }
}

impl Config {
    /// Explicit path if given, otherwise the first readable candidate, otherwise defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidates() {
            if !candidate.exists() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => log::warn!("Ignoring {}: {}", candidate.display(), e),
            }
        }

        log::info!("No ralph.yml found, using defaults");
        Ok(Self::default())
    }

    /// `~/.config/ralph/ralph.yml`, then `./ralph.yml`.
    fn candidates() -> Vec<PathBuf> {
        let name = env!("CARGO_PKG_NAME");
        let file = format!("{}.yml", name);
        let mut candidates = Vec::new();
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join(name).join(&file));
        }
        candidates.push(PathBuf::from(file));
        candidates
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse ralph.yml")?;
        log::info!("Loaded app config from {}", path.display());
        Ok(config)
    }
}
