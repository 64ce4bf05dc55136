//! Materializer configuration.

use crate::error::{OrmError, OrmResult};
use serde::Deserialize;
use std::time::Duration;

/// Command timeout applied when none is configured.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Placeholder prefix applied when none is configured.
pub const DEFAULT_PARAMETER_PREFIX: char = '@';

const ENV_COMMAND_TIMEOUT_SECS: &str = "PGMAT_COMMAND_TIMEOUT_SECS";
const ENV_PARAMETER_PREFIX: &str = "PGMAT_PARAMETER_PREFIX";
const ENV_LOG_PARAMETERS: &str = "PGMAT_LOG_PARAMETERS";
const ENV_SLOW_COMMAND_MS: &str = "PGMAT_SLOW_COMMAND_MS";

/// Configuration for a [`Materializer`](crate::Materializer).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MaterializerConfig {
    /// Timeout stamped on every command the materializer creates.
    pub command_timeout: Duration,
    /// Placeholder prefix for bound parameters.
    pub parameter_prefix: char,
    /// Whether command logs include the SQL rendered with parameter literals.
    pub log_parameters: bool,
    /// Truncate logged SQL to this many bytes. `None` disables truncation.
    pub max_logged_sql: Option<usize>,
    /// Commands slower than this are logged at `warn`.
    pub slow_command_threshold: Option<Duration>,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            parameter_prefix: DEFAULT_PARAMETER_PREFIX,
            log_parameters: false,
            max_logged_sql: Some(200),
            slow_command_threshold: None,
        }
    }
}

impl MaterializerConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from `PGMAT_*` environment variables on top of the defaults.
    pub fn from_env() -> OrmResult<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(ENV_COMMAND_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                OrmError::invalid_argument(format!(
                    "{ENV_COMMAND_TIMEOUT_SECS}: '{raw}' is not a number"
                ))
            })?;
            config = config.command_timeout(Duration::from_secs(secs))?;
        }

        if let Ok(raw) = std::env::var(ENV_PARAMETER_PREFIX) {
            let mut chars = raw.trim().chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => config.parameter_prefix = c,
                _ => {
                    return Err(OrmError::invalid_argument(format!(
                        "{ENV_PARAMETER_PREFIX}: expected a single character, got '{raw}'"
                    )));
                }
            }
        }

        if let Ok(raw) = std::env::var(ENV_LOG_PARAMETERS) {
            config.log_parameters = matches!(raw.trim(), "1" | "true" | "yes" | "on");
        }

        if let Ok(raw) = std::env::var(ENV_SLOW_COMMAND_MS) {
            let ms: u64 = raw.trim().parse().map_err(|_| {
                OrmError::invalid_argument(format!(
                    "{ENV_SLOW_COMMAND_MS}: '{raw}' is not a number"
                ))
            })?;
            config.slow_command_threshold = Some(Duration::from_millis(ms));
        }

        Ok(config)
    }

    /// Reject settings the builder methods would have refused, e.g. a zero
    /// timeout read from a config file.
    pub fn validate(&self) -> OrmResult<()> {
        if self.command_timeout.is_zero() {
            return Err(OrmError::invalid_argument(
                "command timeout must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Set the command timeout. A zero duration is rejected.
    pub fn command_timeout(mut self, timeout: Duration) -> OrmResult<Self> {
        self.command_timeout = timeout;
        self.validate()?;
        Ok(self)
    }

    /// Set the placeholder prefix.
    pub fn parameter_prefix(mut self, prefix: char) -> Self {
        self.parameter_prefix = prefix;
        self
    }

    /// Include parameter literals in command logs.
    pub fn log_parameters(mut self, enabled: bool) -> Self {
        self.log_parameters = enabled;
        self
    }

    /// Set maximum SQL length to log.
    pub fn max_logged_sql(mut self, len: usize) -> Self {
        self.max_logged_sql = Some(len);
        self
    }

    /// Disable SQL truncation in logs.
    pub fn no_truncate(mut self) -> Self {
        self.max_logged_sql = None;
        self
    }

    /// Set slow command threshold.
    pub fn slow_command_threshold(mut self, threshold: Duration) -> Self {
        self.slow_command_threshold = Some(threshold);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = MaterializerConfig::new();
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.parameter_prefix, '@');
        assert!(!config.log_parameters);
        assert_eq!(config.max_logged_sql, Some(200));
        assert_eq!(config.slow_command_threshold, None);
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let err = MaterializerConfig::new()
            .command_timeout(Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, OrmError::InvalidArgument(_)));
    }

    #[test]
    fn builder_methods_chain() {
        let config = MaterializerConfig::new()
            .parameter_prefix(':')
            .log_parameters(true)
            .no_truncate()
            .slow_command_threshold(Duration::from_millis(250));
        assert_eq!(config.parameter_prefix, ':');
        assert!(config.log_parameters);
        assert_eq!(config.max_logged_sql, None);
        assert_eq!(config.slow_command_threshold, Some(Duration::from_millis(250)));
    }

    #[test]
    fn deserializes_partial_config() {
        let config: MaterializerConfig =
            serde_json::from_str(r#"{ "parameter_prefix": ":", "log_parameters": true }"#).unwrap();
        assert_eq!(config.parameter_prefix, ':');
        assert!(config.log_parameters);
        assert_eq!(config.command_timeout, DEFAULT_COMMAND_TIMEOUT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialized_zero_timeout_fails_validation() {
        let config: MaterializerConfig =
            serde_json::from_str(r#"{ "command_timeout": { "secs": 0, "nanos": 0 } }"#).unwrap();
        assert_eq!(config.command_timeout, Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, OrmError::InvalidArgument(_)));
    }
}
