//! Configuration module for zypperpkg
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/zypperpkg/config.toml)
//! - User configuration (~/.zypperpkg.toml)
//! - Project configuration (./zypperpkg.toml)
//! - An explicit path (`-c` or `ZYPPERPKG_CONFIG`)
//! - Environment variables

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Zypper behaviour
    pub zypper: ZypperConfig,

    /// Agent-wide settings
    pub agent: AgentConfig,

    /// Fact overrides, applied after gathering
    pub grains: IndexMap<String, Value>,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Colors and output settings
    pub colors: ColorsConfig,
}

/// `zypper` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZypperConfig {
    /// Default for `refresh_db(force)`
    pub refreshdb_force: bool,

    /// Run package transactions in a `systemd-run --scope` when possible
    pub systemd_scope: bool,

    /// Seconds to sleep between attempts while zypper or RPM is locked
    pub lock_wait_secs: u64,

    /// Give up after this many locked attempts; unbounded when unset
    pub lock_max_attempts: Option<u32>,
}

impl Default for ZypperConfig {
    fn default() -> Self {
        Self {
            refreshdb_force: true,
            systemd_scope: true,
            lock_wait_secs: 5,
            lock_max_attempts: None,
        }
    }
}

/// `agent` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Where the refresh tag and other agent state live
    pub cachedir: PathBuf,

    /// Default alternative root for every function taking `root`
    pub root: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cachedir: PathBuf::from("/var/cache/zypperpkg"),
            root: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level used when no `-v` flag and no `RUST_LOG` is given
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Colors configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorsConfig {
    /// Enable colored output
    pub enabled: bool,
}

impl Default for ColorsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Config::default();

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                config = config.merge_from_file(&path)?;
            }
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Get the list of configuration file paths to check, lowest priority first
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/zypperpkg/config.toml")];

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".zypperpkg.toml"));
        }

        paths.push(PathBuf::from("zypperpkg.toml"));

        if let Some(path) = explicit_path {
            paths.push(path.clone());
        } else if let Ok(env_config) = std::env::var("ZYPPERPKG_CONFIG") {
            paths.push(PathBuf::from(env_config));
        }

        paths
    }

    /// Merge configuration from a file
    fn merge_from_file(&self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let file_config: Config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        Ok(self.merge(file_config))
    }

    /// Merge another config into this one
    fn merge(&self, other: Config) -> Config {
        let mut grains = self.grains.clone();
        grains.extend(other.grains);

        Config {
            zypper: ZypperConfig {
                lock_max_attempts: other
                    .zypper
                    .lock_max_attempts
                    .or(self.zypper.lock_max_attempts),
                ..other.zypper
            },
            agent: AgentConfig {
                root: other.agent.root.or_else(|| self.agent.root.clone()),
                ..other.agent
            },
            grains,
            logging: other.logging,
            colors: other.colors,
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Some(force) = env_bool("ZYPPERPKG_REFRESHDB_FORCE") {
            self.zypper.refreshdb_force = force;
        }

        if let Some(scope) = env_bool("ZYPPERPKG_SYSTEMD_SCOPE") {
            self.zypper.systemd_scope = scope;
        }

        if let Ok(wait) = std::env::var("ZYPPERPKG_LOCK_WAIT_SECS") {
            if let Ok(n) = wait.parse() {
                self.zypper.lock_wait_secs = n;
            }
        }

        if let Ok(root) = std::env::var("ZYPPERPKG_ROOT") {
            self.agent.root = Some(root).filter(|r| !r.is_empty());
        }

        if let Ok(dir) = std::env::var("ZYPPERPKG_CACHEDIR") {
            self.agent.cachedir = PathBuf::from(dir);
        }

        if std::env::var("NO_COLOR").is_ok() {
            self.colors.enabled = false;
        }
    }

    /// Load from a specific file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Config::default().merge_from_file(path.as_ref())
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
