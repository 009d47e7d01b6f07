//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{MigrateError, Result};
use crate::timestamp::parse_offset;
use chrono::FixedOffset;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 fingerprint of the configuration, recorded in reports.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl MigrationConfig {
    /// The parsed reference offset.
    pub fn reference_offset(&self) -> Result<FixedOffset> {
        parse_offset(&self.reference_offset).ok_or_else(|| {
            MigrateError::Config(format!(
                "migration.reference_offset '{}' is not a UTC offset like +02:00",
                self.reference_offset
            ))
        })
    }

    /// Per-operation timeout.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.get_operation_timeout_secs())
    }
}
