use std::path::{Path, PathBuf};

use foreman_common::config::ControllerConfig;

use super::validation;

/// Load controller configuration from the given config directory.
///
/// Reads `controller.toml` when present; a missing file yields the complete
/// default configuration (every option has a default). The controller
/// refuses to start on validation failure.
pub fn load_config(config_dir: &Path) -> Result<ControllerConfig, ConfigError> {
    tracing::info!(config_dir = %config_dir.display(), "Loading configuration");

    let path = config_dir.join("controller.toml");
    let config = if path.exists() {
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileRead {
            path: path.clone(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            detail: e.to_string(),
        })?
    } else {
        tracing::warn!(path = %path.display(), "No controller.toml found, using defaults");
        ControllerConfig::default()
    };

    validation::validate(&config)?;

    tracing::info!("Configuration loaded successfully");
    Ok(config)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

impl From<ConfigError> for foreman_common::ControllerError {
    fn from(e: ConfigError) -> Self {
        foreman_common::ControllerError::Config(e.to_string())
    }
}
