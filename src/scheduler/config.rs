//! Rate limit configuration for the request queue.
//!
//! A queue is built from an immutable `RateLimitConfig`: the per-minute
//! request budget, the retry delay (which doubles as the minimum spacing
//! between dispatches) and the per-unit retry ceiling.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Budget and retry settings for a `RequestQueue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum number of dispatches in any 60 second window.
    pub requests_per_minute: u32,
    /// Base unit for exponential backoff and minimum spacing between dispatches.
    pub retry_delay: Duration,
    /// Maximum number of throttling retries per unit. Zero disables retry.
    pub max_retries: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 3,
            retry_delay: Duration::from_secs(20),
            max_retries: 3,
        }
    }
}

impl RateLimitConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RATE_LIMIT_REQUESTS_PER_MINUTE`: Per-minute budget (default: 3)
    /// - `RATE_LIMIT_RETRY_DELAY_SECS`: Backoff base and spacing in seconds, fractional allowed (default: 20)
    /// - `RATE_LIMIT_MAX_RETRIES`: Retry ceiling per unit (default: 3)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RATE_LIMIT_REQUESTS_PER_MINUTE") {
            config.requests_per_minute = parse_env_value(&val, "RATE_LIMIT_REQUESTS_PER_MINUTE")?;
        }

        if let Ok(val) = std::env::var("RATE_LIMIT_RETRY_DELAY_SECS") {
            let secs: f64 = parse_env_value(&val, "RATE_LIMIT_RETRY_DELAY_SECS")?;
            config.retry_delay = parse_duration_secs(secs, "RATE_LIMIT_RETRY_DELAY_SECS")?;
        }

        if let Ok(val) = std::env::var("RATE_LIMIT_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "RATE_LIMIT_MAX_RETRIES")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.requests_per_minute == 0 {
            return Err(ConfigError::ValidationFailed(
                "requests_per_minute must be greater than 0".to_string(),
            ));
        }

        if self.retry_delay.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "retry_delay must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the per-minute budget.
    pub fn with_requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = rpm;
        self
    }

    /// Builder method to set the retry delay / minimum spacing.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Builder method to set the retry ceiling.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Backoff before retry number `retry` (1-based): `retry_delay * 2^(retry - 1)`.
    ///
    /// Saturates at `Duration::MAX` once the product no longer fits.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1);
        2u32.checked_pow(exp)
            .and_then(|factor| self.retry_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }
}

/// Parse an environment variable value into a type.
pub(crate) fn parse_env_value<T: std::str::FromStr>(
    value: &str,
    key: &str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
pub(crate) fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

/// Convert a (possibly fractional) number of seconds into a `Duration`.
pub(crate) fn parse_duration_secs(secs: f64, key: &str) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{}' is not a valid number of seconds", secs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.requests_per_minute, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(20));
        assert_eq!(config.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = RateLimitConfig::new()
            .with_requests_per_minute(60)
            .with_retry_delay(Duration::from_millis(500))
            .with_max_retries(0);

        assert_eq!(config.requests_per_minute, 60);
        assert_eq!(config.retry_delay, Duration::from_millis(500));
        assert_eq!(config.max_retries, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_budget() {
        let result = RateLimitConfig::new().with_requests_per_minute(0).validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("requests_per_minute"));
    }

    #[test]
    fn test_validation_zero_delay() {
        let result = RateLimitConfig::new()
            .with_retry_delay(Duration::ZERO)
            .validate();
        assert!(result.unwrap_err().to_string().contains("retry_delay"));
    }

    #[test]
    fn test_backoff_doubles_from_retry_delay() {
        let config = RateLimitConfig::new().with_retry_delay(Duration::from_secs(2));
        assert_eq!(config.backoff_for(1), Duration::from_secs(2));
        assert_eq!(config.backoff_for(2), Duration::from_secs(4));
        assert_eq!(config.backoff_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_keeps_doubling_past_many_retries() {
        let config = RateLimitConfig::new().with_retry_delay(Duration::from_millis(1));
        assert_eq!(config.backoff_for(18), Duration::from_millis(1 << 17));
        assert_eq!(config.backoff_for(25), Duration::from_millis(1 << 24));
        assert_eq!(config.backoff_for(33), Duration::MAX);
        assert_eq!(config.backoff_for(u32::MAX), Duration::MAX);
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_env_value::<u32>(" 12 ", "K").unwrap(), 12);
        assert!(parse_env_value::<u32>("twelve", "K").is_err());

        assert!(parse_env_bool("YES", "K").unwrap());
        assert!(!parse_env_bool("off", "K").unwrap());
        assert!(parse_env_bool("maybe", "K").is_err());

        assert_eq!(
            parse_duration_secs(1.5, "K").unwrap(),
            Duration::from_millis(1500)
        );
        assert!(parse_duration_secs(-1.0, "K").is_err());
    }
}
