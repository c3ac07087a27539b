//! Pipeline configuration
//!
//! Loaded from `~/.streamwright/config.toml`. Every field has a default, so a
//! missing file or a partial file is fine:
//!
//! ```toml
//! [registry]
//! policy = "reject"
//!
//! [router]
//! edits_placeholder = false
//!
//! [edits]
//! save_on_end = true
//! restore_on_failure = true
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::paths;
use crate::stream::RegistrationPolicy;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub registry: RegistryConfig,
    pub router: RouterConfig,
    pub edits: EditConfig,
}

/// Response stream registry settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// What happens when a sink is registered for a key that already has one
    pub policy: RegistrationPolicy,
}

/// Event router settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Send an edits-info placeholder on the first chat delta of an exchange
    pub edits_placeholder: bool,
    /// Placeholder description
    pub placeholder_description: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            edits_placeholder: constants::router::EDITS_PLACEHOLDER,
            placeholder_description: constants::router::PLACEHOLDER_DESCRIPTION.to_string(),
        }
    }
}

/// Edit application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditConfig {
    /// Save the document when an edit request ends
    pub save_on_end: bool,
    /// Restore the Start snapshot when applying a line fails
    pub restore_on_failure: bool,
}

impl Default for EditConfig {
    fn default() -> Self {
        Self {
            save_on_end: constants::edits::SAVE_ON_END,
            restore_on_failure: constants::edits::RESTORE_ON_FAILURE,
        }
    }
}

impl PipelineConfig {
    /// Load from the default location
    pub fn load() -> Result<Self> {
        Self::load_from_path(&paths::config_file())
    }

    /// Load from a specific path, falling back to defaults when the file is absent
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: PipelineConfig = toml::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Write to a specific path, creating parent directories
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        tracing::debug!("Config saved to {:?}", path);
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
