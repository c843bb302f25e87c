//! Persistent settings
//!
//! Connector timing and scan settings, stored as pretty-printed JSON.
//! Missing fields take their defaults, so a partial file is fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::protocol::{ConnectorConfig, ProtocolError};
use crate::scan::ScanConfig;

/// Name of the settings file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// All user-tunable settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoutConfig {
    /// Reset, retry and handshake timing
    pub connector: ConnectorConfig,
    /// Which ports a scan covers and how
    pub scan: ScanConfig,
}

impl ScoutConfig {
    /// Default settings location in the user's config directory
    pub fn default_path() -> io::Result<PathBuf> {
        let base = dirs::config_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "Could not find config directory")
            })?;
        Ok(base.join("firmata-scout").join(CONFIG_FILE_NAME))
    }

    /// Load settings from `path`; a missing file yields the defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: ScoutConfig = serde_json::from_str(&content)
            .map_err(|e| ProtocolError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write settings to `path`, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ProtocolError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ProtocolError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check both sections
    pub fn validate(&self) -> Result<(), ProtocolError> {
        self.connector.validate()?;
        self.scan.validate()
    }
}
