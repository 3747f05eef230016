//! Controller configuration, loaded from TOML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

const MIN_TOKEN_LENGTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Allow mutations without a version, resolved by reading the current one.
    pub automatic_versioning: bool,
    /// Length of generated auth token values.
    pub token_length: usize,
    pub token_time_to_live_secs: u64,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file; in-memory when absent.
    pub path: Option<String>,
    pub busy_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            automatic_versioning: true,
            token_length: 32,
            token_time_to_live_secs: 7 * 24 * 60 * 60,
            storage: StorageConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5000,
        }
    }
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl ControllerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.token_length < MIN_TOKEN_LENGTH {
            return Err(EngineError::Config(format!(
                "token_length must be at least {MIN_TOKEN_LENGTH}, got {}",
                self.token_length
            )));
        }
        if self.token_time_to_live_secs == 0 {
            return Err(EngineError::Config("token_time_to_live_secs must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ControllerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert!(config.automatic_versioning);
        assert!(config.storage.path.is_none());
    }

    #[test]
    fn parses_sections() {
        let config = ControllerConfig::from_toml_str(
            r#"
            automatic_versioning = false
            token_length = 48

            [storage]
            path = "/var/lib/portcullis/controller.db"
            busy_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert!(!config.automatic_versioning);
        assert_eq!(config.token_length, 48);
        assert_eq!(config.storage.path.as_deref(), Some("/var/lib/portcullis/controller.db"));
        assert_eq!(config.storage.busy_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn short_tokens_rejected() {
        let err = ControllerConfig::from_toml_str("token_length = 8").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn unknown_types_rejected() {
        assert!(ControllerConfig::from_toml_str("automatic_versioning = \"yes\"").is_err());
    }
}
