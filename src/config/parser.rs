//! Configuration parser for loading engine configuration.
//!
//! This module handles loading configuration from YAML files, `.env` files
//! and environment variables, with environment values taking precedence.

use crate::error::{ConfigError, Result};
use crate::planner::FailurePolicy;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::types::{EngineConfig, StateBackend};

/// Environment variable overriding `concurrency`.
pub const ENV_CONCURRENCY: &str = "CONVERGE_CONCURRENCY";
/// Environment variable overriding `policy`.
pub const ENV_POLICY: &str = "CONVERGE_POLICY";
/// Environment variable overriding `state.backend`.
pub const ENV_STATE_BACKEND: &str = "CONVERGE_STATE_BACKEND";
/// Environment variable overriding `state.path`.
pub const ENV_STATE_PATH: &str = "CONVERGE_STATE_PATH";
/// Environment variable overriding `state.bucket`.
pub const ENV_STATE_BUCKET: &str = "CONVERGE_STATE_BUCKET";
/// Environment variable overriding `state.prefix`.
pub const ENV_STATE_PREFIX: &str = "CONVERGE_STATE_PREFIX";
/// Environment variable overriding `state.region`.
pub const ENV_STATE_REGION: &str = "CONVERGE_STATE_REGION";

/// Configuration parser for loading engine configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for locating the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for locating the `.env` file.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<EngineConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// Blank content yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<EngineConfig> {
        debug!("Parsing YAML configuration");

        if content.trim().is_empty() {
            return Ok(EngineConfig::default());
        }

        let config: EngineConfig = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            message: format!("YAML parse error: {e}"),
            location: source.map(|p| p.display().to_string()),
        })?;

        debug!(
            "Parsed configuration: concurrency {}, policy {}, state backend {}",
            config.concurrency, config.policy, config.state.backend
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// holds an invalid value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<EngineConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Applies process environment overrides to the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnvVar`] for an unusable value.
    pub fn apply_env_overrides(config: &mut EngineConfig) -> Result<()> {
        Self::apply_overrides(config, |name| std::env::var(name).ok())
    }

    /// Applies overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnvVar`] for an unusable value.
    pub fn apply_overrides<F>(config: &mut EngineConfig, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_CONCURRENCY) {
            debug!("Overriding concurrency from environment");
            config.concurrency = value
                .trim()
                .parse()
                .map_err(|_| invalid(ENV_CONCURRENCY, &value))?;
        }

        if let Some(value) = lookup(ENV_POLICY) {
            debug!("Overriding policy from environment");
            config.policy = value
                .parse::<FailurePolicy>()
                .map_err(|_| invalid(ENV_POLICY, &value))?;
        }

        if let Some(value) = lookup(ENV_STATE_BACKEND) {
            debug!("Overriding state.backend from environment");
            config.state.backend = value
                .parse::<StateBackend>()
                .map_err(|_| invalid(ENV_STATE_BACKEND, &value))?;
        }

        if let Some(path) = lookup(ENV_STATE_PATH) {
            debug!("Overriding state.path from environment");
            config.state.path = Some(path);
        }

        if let Some(bucket) = lookup(ENV_STATE_BUCKET) {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Some(prefix) = lookup(ENV_STATE_PREFIX) {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }

        if let Some(region) = lookup(ENV_STATE_REGION) {
            debug!("Overriding state.region from environment");
            config.state.region = Some(region);
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvVar {
        name: name.to_string(),
        value: value.to_string(),
    }
}
