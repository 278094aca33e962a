//! Configuration types for the Opsgate trust pipeline.
//!
//! A single YAML file (`opsgate.yaml`) configures the pipeline, constraint
//! engine, approvals, the static policy evaluator and the HTTP server. Files
//! ending in `.toml` are read as TOML instead.
//!
//! # Sections
//!
//! - **pipeline**: timeouts for best-effort collaborator calls
//! - **constraints**: defaults for the constraint engine
//! - **approvals**: approval request lifetime
//! - **policy**: decisions and constraints for the config-driven policy evaluator
//! - **server**: bind address

pub mod approvals;
pub mod pipeline;
pub mod policy;

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub use approvals::{ApprovalsConfig, MAX_TTL_HOURS};
pub use pipeline::{ConstraintsConfig, PipelineConfig};
pub use policy::PolicyConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "OPSGATE_CONFIG";

/// Complete Opsgate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub constraints: ConstraintsConfig,

    #[serde(default)]
    pub approvals: ApprovalsConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address, e.g. "0.0.0.0:8080"
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GateConfig {
    /// Load configuration from a file. The format follows the extension:
    /// `.toml` is TOML, anything else is YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::from_toml(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse configuration from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `$OPSGATE_CONFIG`, falling back to `opsgate.yaml` in the
    /// working directory. A missing default file yields the defaults; a
    /// missing explicitly named file is an error.
    pub fn load() -> Result<Self, ConfigError> {
        match env::var(CONFIG_ENV_VAR) {
            Ok(path) => Self::from_file(PathBuf::from(path)),
            Err(_) => {
                let path = PathBuf::from("opsgate.yaml");
                if path.exists() {
                    Self::from_file(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Reject settings that would silently disable a guard.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.constraints.default_max_targets == 0 {
            return Err(ConfigError::Config(
                "constraints.default_max_targets must be greater than zero".to_string(),
            ));
        }
        if self.approvals.ttl_hours <= 0 || self.approvals.ttl_hours > MAX_TTL_HOURS {
            return Err(ConfigError::Config(format!(
                "approvals.ttl_hours must be between 1 and {MAX_TTL_HOURS}"
            )));
        }
        self.policy.validate().map_err(ConfigError::Config)
    }
}
