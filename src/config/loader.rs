//! Layered configuration loading
//!
//! Layers `config/flowgate.toml`, `config/flowgate.{env}.toml` and
//! `FLOWGATE__*` environment variables, in that order. Missing files are
//! skipped.

use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::FlowgateConfig;
use crate::error::FlowResult;

/// Loaded configuration together with where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: FlowgateConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load from the default directory for the detected environment
    pub fn load() -> FlowResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load from `config_dir`, or the default directory, for the detected environment
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> FlowResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load for an explicit environment instead of reading `FLOWGATE_ENV`
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> FlowResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            host = %config.node.host,
            port = config.node.port,
            "⚙️ Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    fn build(directory: &Path, environment: &str) -> FlowResult<FlowgateConfig> {
        let base = directory.join("flowgate.toml");
        let overlay = directory.join(format!("flowgate.{environment}.toml"));

        let config = Config::builder()
            .add_source(File::from(base).required(false))
            .add_source(File::from(overlay).required(false))
            .add_source(
                Environment::with_prefix("FLOWGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn config(&self) -> &FlowgateConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Environment named by `FLOWGATE_ENV`
    pub fn detect_environment() -> String {
        crate::logging::get_environment()
    }

    fn default_config_directory() -> PathBuf {
        std::env::var("FLOWGATE_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RejectionPolicy;
    use std::fs;

    #[test]
    fn test_missing_directory_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().join("absent")), "test")
                .unwrap();
        assert_eq!(manager.config().heartbeat.max_in_clause_size, 1000);
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn test_environment_file_overrides_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("flowgate.toml"),
            "[node]\nhost = \"10.0.0.1\"\nport = 9001\n\n[executor]\nrejection_policy = \"reject\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("flowgate.production.toml"),
            "[node]\nport = 9100\n",
        )
        .unwrap();

        let manager = ConfigManager::load_from_directory_with_env(
            Some(dir.path().to_path_buf()),
            "production",
        )
        .unwrap();
        let config = manager.config();
        assert_eq!(config.node.host, "10.0.0.1");
        assert_eq!(config.node.port, 9100);
        assert_eq!(config.executor.rejection_policy, RejectionPolicy::Reject);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("flowgate.toml"),
            "[heartbeat]\ninterval_secs = 30\ntimeout_secs = 10\n",
        )
        .unwrap();
        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(result.is_err());
    }
}
