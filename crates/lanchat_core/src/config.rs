use anyhow::{Context, Result};
use lanchat_network::NetworkConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Application configuration persisted at `~/.lanchat/config.json`.
///
/// Every field has a default, so a partial or empty file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Nickname to announce. Prompted for at startup when absent.
    pub nickname: Option<String>,

    /// Default tracing filter when `RUST_LOG` is not set.
    pub log_level: String,

    /// Discovery and messaging settings.
    pub network: NetworkConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            nickname: None,
            log_level: "info".into(),
            network: NetworkConfig::default(),
        }
    }
}

impl ChatConfig {
    /// Returns the base config directory: `~/.lanchat/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".lanchat"))
    }

    /// Returns the config file path: `~/.lanchat/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.lanchat/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Ensures all required directories exist.
    pub fn ensure_dirs() -> Result<()> {
        for dir in [Self::base_dir()?, Self::logs_dir()?] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            }
        }
        Ok(())
    }

    /// Loads config from the default location, creating it if missing.
    pub fn load() -> Result<Self> {
        Self::ensure_dirs()?;
        let path = Self::config_path()?;
        Self::load_from_path(&path)
    }

    /// Load config from a specific file path. A missing file is created with
    /// defaults; an unreadable or corrupt one is an error.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: Self = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            config
                .network
                .validate()
                .with_context(|| format!("Invalid settings in {}", path.display()))?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to_path(path)?;
            info!("Created default config at {}", path.display());
            Ok(config)
        }
    }

    /// Save config to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
