//! Configuration Management
//!
//! Persistent user defaults for stackplan, stored as JSON in the user's
//! config directory.

use crate::app::DEFAULT_STACK_NAME;
use crate::emit::OutputFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Stack name used when none is given
    #[serde(default)]
    pub stack_name: Option<String>,
    /// Manifest format used when none is given
    #[serde(default)]
    pub format: Option<OutputFormat>,
    /// Context file read when none is given
    #[serde(default)]
    pub context_file: Option<PathBuf>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("stackplan").join("config.json"))
    }

    /// Load configuration from disk, falling back to defaults
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from a specific file. A missing or unreadable file
    /// yields the defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                tracing::warn!("Failed to read config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config {}", path.display()))?;

        tracing::info!("Saved defaults to {}", path.display());
        Ok(())
    }

    /// Get effective stack name (CLI > config > built-in default)
    pub fn effective_stack_name(&self, cli: Option<&str>) -> String {
        cli.map(String::from)
            .or_else(|| self.stack_name.clone())
            .unwrap_or_else(|| DEFAULT_STACK_NAME.to_string())
    }

    /// Get effective output format (CLI > config > JSON)
    pub fn effective_format(&self, cli: Option<OutputFormat>) -> OutputFormat {
        cli.or(self.format).unwrap_or_default()
    }

    /// Get effective context file (CLI > config)
    pub fn effective_context_file(&self, cli: Option<&Path>) -> Option<PathBuf> {
        cli.map(Path::to_path_buf)
            .or_else(|| self.context_file.clone())
    }

    /// Record the values given on the command line as new defaults
    pub fn remember(
        &mut self,
        stack_name: Option<&str>,
        format: Option<OutputFormat>,
        context_file: Option<&Path>,
    ) {
        if let Some(name) = stack_name {
            self.stack_name = Some(name.to_string());
        }
        if let Some(format) = format {
            self.format = Some(format);
        }
        if let Some(path) = context_file {
            self.context_file = Some(path.to_path_buf());
        }
    }
}
