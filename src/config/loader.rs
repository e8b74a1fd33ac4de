//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::{ResilienceConfig, ResilienceConfigBuilder};
use crate::config::validation::ValidationError;

/// Error type for configuration loading and construction.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

impl ConfigError {
    /// The individual violations, empty for IO and parse failures.
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            ConfigError::Validation(errors) => errors,
            _ => &[],
        }
    }
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ResilienceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config = ResilienceConfig::from_toml_str(&content)?;

    tracing::debug!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

impl ResilienceConfig {
    /// Parse and validate the flat TOML schema. Missing keys take defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: ResilienceConfigBuilder = toml::from_str(content)?;
        raw.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config = ResilienceConfig::from_toml_str(
            r#"
            max_retries = 5
            recovery_timeout = 12.5
            jitter = false
            "#,
        )
        .unwrap();

        assert_eq!(config.max_retries(), 5);
        assert_eq!(config.recovery_timeout(), Duration::from_millis(12_500));
        assert!(!config.jitter());
        assert_eq!(config.failure_threshold(), 5);
        assert_eq!(config.max_delay(), Duration::from_secs(300));
    }

    #[test]
    fn reports_all_validation_errors() {
        let err = ResilienceConfig::from_toml_str(
            r#"
            max_retries = -2
            failure_threshold = 0
            "#,
        )
        .unwrap_err();

        let fields: Vec<_> = err.validation_errors().iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["max_retries", "failure_threshold"]);
        let message = err.to_string();
        assert!(message.starts_with("Validation failed: "));
        assert!(message.contains("max_retries: must be a non-negative integer"));
    }

    #[test]
    fn unknown_keys_are_parse_errors() {
        let err = ResilienceConfig::from_toml_str("max_retry = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/definitely/not/here/resilience.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
        assert!(err.validation_errors().is_empty());
    }
}
