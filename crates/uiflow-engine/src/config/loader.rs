use crate::fallback::{StrategyTable, StrategyTableError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use uiflow_common::config::UiflowConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid strategy table: {0}")]
    Strategies(#[from] StrategyTableError),
    #[error("Invalid process pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from default locations:
    /// 1. ./uiflow.yaml
    /// 2. ~/.uiflow/config.yaml
    /// 3. Default configuration
    pub async fn load_default() -> Result<UiflowConfig, ConfigError> {
        let local_config = PathBuf::from("./uiflow.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".uiflow").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }

        debug!("no config file found, using defaults");
        Ok(UiflowConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<UiflowConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: UiflowConfig = serde_yaml::from_str(&content)?;
        Self::validate(&config)?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Rejects settings that would only fail later, mid-run.
    pub fn validate(config: &UiflowConfig) -> Result<(), ConfigError> {
        StrategyTable::with_overrides(&config.strategies)?;
        for pattern in &config.session.process_patterns {
            regex::Regex::new(pattern)?;
        }
        if let Some(command) = &config.session.bridge_command
            && command.is_empty()
        {
            return Err(ConfigError::Invalid(
                "session.bridge_command must not be empty".into(),
            ));
        }
        if !(6..=8).contains(&config.otp.digits) {
            return Err(ConfigError::Invalid(format!(
                "otp.digits must be between 6 and 8, got {}",
                config.otp.digits
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "bridge:\n  url: http://127.0.0.1:4000\nexecution:\n  session_dead_after: 5"
        )
        .unwrap();

        let config = ConfigLoader::load_from(file.path()).await.unwrap();
        assert_eq!(config.bridge.url, "http://127.0.0.1:4000");
        assert_eq!(config.execution.session_dead_after, 5);
        assert_eq!(config.screenshots.min_bytes, 5_000);
    }

    #[tokio::test]
    async fn test_empty_strategy_list_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "strategies:\n  click: []").unwrap();

        let err = ConfigLoader::load_from(file.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Strategies(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let err = ConfigLoader::load_from(Path::new("/nonexistent/uiflow.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
