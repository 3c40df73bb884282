use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::DEFAULT_BACKOFFS;

/// Environment variable read by [`TransacterConfig::from_env`].
pub const BACKOFFS_ENV_VAR: &str = "TRANSACTER_BACKOFFS_MS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {var}: {message}")]
    InvalidEnv { var: &'static str, message: String },
}

/// Transacter configuration
///
/// Loadable from JSON or the environment, applied with
/// [`Transacter::with_config`](crate::Transacter::with_config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransacterConfig {
    /// Delays between retries in milliseconds; the length caps the retry count.
    pub backoffs_ms: Vec<u64>,
}

// Saturates instead of truncating
fn to_millis(backoff: &Duration) -> u64 {
    u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX)
}

impl Default for TransacterConfig {
    fn default() -> Self {
        Self {
            backoffs_ms: DEFAULT_BACKOFFS.iter().map(to_millis).collect(),
        }
    }
}

impl TransacterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backoff schedule
    pub fn backoffs(mut self, backoffs: impl IntoIterator<Item = Duration>) -> Self {
        self.backoffs_ms = backoffs
            .into_iter()
            .map(|backoff| to_millis(&backoff))
            .collect();
        self
    }

    /// Disable retries
    pub fn no_retries(mut self) -> Self {
        self.backoffs_ms.clear();
        self
    }

    pub fn backoff_delays(&self) -> Vec<Duration> {
        self.backoffs_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    /// Parse from JSON
    ///
    /// Missing fields fall back to their defaults.
    ///
    /// ```
    /// # use transacter::TransacterConfig;
    /// let config = TransacterConfig::from_json(r#"{ "backoffs_ms": [10, 20] }"#).unwrap();
    /// assert_eq!(config.backoffs_ms, vec![10, 20]);
    /// ```
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read from `TRANSACTER_BACKOFFS_MS`, a comma-separated list of
    /// milliseconds. Unset means defaults; an empty value disables retries.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var(BACKOFFS_ENV_VAR) {
            Ok(raw) => Self::parse_backoffs(&raw),
            Err(env::VarError::NotPresent) => Ok(Self::default()),
            Err(err) => Err(ConfigError::InvalidEnv {
                var: BACKOFFS_ENV_VAR,
                message: err.to_string(),
            }),
        }
    }

    fn parse_backoffs(raw: &str) -> Result<Self, ConfigError> {
        let backoffs_ms = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<u64>().map_err(|err| ConfigError::InvalidEnv {
                    var: BACKOFFS_ENV_VAR,
                    message: format!("'{}': {}", part, err),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { backoffs_ms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_default_backoffs() {
        assert_eq!(TransacterConfig::default().backoff_delays(), DEFAULT_BACKOFFS.to_vec());
    }

    #[test]
    fn test_from_json_defaults_missing_fields() {
        let config = TransacterConfig::from_json("{}").unwrap();
        assert_eq!(config, TransacterConfig::default());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            TransacterConfig::from_json(r#"{ "backoffs_ms": "fast" }"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_backoffs() {
        let config = TransacterConfig::parse_backoffs(" 5, 50 ,500").unwrap();
        assert_eq!(
            config.backoff_delays(),
            vec![
                Duration::from_millis(5),
                Duration::from_millis(50),
                Duration::from_millis(500)
            ]
        );

        assert!(TransacterConfig::parse_backoffs("").unwrap().backoffs_ms.is_empty());
        assert!(TransacterConfig::parse_backoffs("10,soon").is_err());
    }

    #[test]
    fn test_builder() {
        let config = TransacterConfig::new().backoffs([Duration::from_secs(2)]);
        assert_eq!(config.backoffs_ms, vec![2000]);
        assert!(config.no_retries().backoff_delays().is_empty());
    }

    #[test]
    fn test_huge_backoff_saturates() {
        let config = TransacterConfig::new().backoffs([Duration::MAX]);
        assert_eq!(config.backoffs_ms, vec![u64::MAX]);
    }
}
