//! Unified path management for nexus configuration and state files.
//!
//! # Directory Structure
//!
//! ```text
//! ~/.config/nexus/             # Config directory (platform default via `dirs`)
//! ├── config.toml              # NexusConfig
//! ├── state.json               # Key-value state (stored sessions, selections)
//! └── logs/                    # Rolling log files
//!     └── nexus.log.YYYY-MM-DD
//! ```

use std::path::PathBuf;

const APP_DIR: &str = "nexus";

/// Errors that can occur during path resolution.
#[derive(Debug)]
pub enum PathError {
    /// Platform config directory could not be determined.
    ConfigDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::ConfigDirNotFound => write!(f, "Cannot find config directory"),
        }
    }
}

impl std::error::Error for PathError {}

impl From<PathError> for nexus_core::NexusError {
    fn from(err: PathError) -> Self {
        nexus_core::NexusError::config(err.to_string())
    }
}

/// Path resolver rooted at the platform config dir, or at an explicit base.
#[derive(Debug, Clone, Default)]
pub struct NexusPaths {
    base: Option<PathBuf>,
}

impl NexusPaths {
    /// Creates a resolver. `base` replaces the platform config directory,
    /// which keeps tests away from the real one.
    pub fn new(base: Option<PathBuf>) -> Self {
        Self { base }
    }

    /// Returns the nexus configuration directory (e.g. `~/.config/nexus/`).
    pub fn config_dir(&self) -> Result<PathBuf, PathError> {
        match &self.base {
            Some(base) => Ok(base.clone()),
            None => dirs::config_dir()
                .map(|dir| dir.join(APP_DIR))
                .ok_or(PathError::ConfigDirNotFound),
        }
    }

    pub fn config_file(&self) -> Result<PathBuf, PathError> {
        Ok(self.config_dir()?.join("config.toml"))
    }

    /// Returns the path of the JSON key-value state file.
    pub fn state_file(&self) -> Result<PathBuf, PathError> {
        Ok(self.config_dir()?.join("state.json"))
    }

    pub fn logs_dir(&self) -> Result<PathBuf, PathError> {
        Ok(self.config_dir()?.join("logs"))
    }
}
