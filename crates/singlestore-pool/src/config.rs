//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Configuration for the session pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of sessions leased at once.
    pub max_sessions: u32,

    /// Time to wait for a session before timing out.
    pub acquire_timeout: Duration,

    /// Whether to reset sessions when they are returned.
    pub reset_on_return: bool,

    /// Whether to ping idle sessions before leasing them.
    pub ping_on_lease: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            acquire_timeout: Duration::from_secs(15),
            reset_on_return: true,
            ping_on_lease: false,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of leased sessions.
    #[must_use]
    pub fn max_sessions(mut self, count: u32) -> Self {
        self.max_sessions = count;
        self
    }

    /// Set the session acquisition timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Enable or disable resetting sessions on return.
    #[must_use]
    pub fn reset_on_return(mut self, enabled: bool) -> Self {
        self.reset_on_return = enabled;
        self
    }

    /// Enable or disable pinging idle sessions before leasing them.
    #[must_use]
    pub fn ping_on_lease(mut self, enabled: bool) -> Self {
        self.ping_on_lease = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_sessions == 0 {
            return Err(PoolError::Configuration(
                "max_sessions must be greater than 0".into(),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(PoolError::Configuration(
                "acquire_timeout must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.max_sessions, 100);
        assert_eq!(config.acquire_timeout, Duration::from_secs(15));
        assert!(config.reset_on_return);
        assert!(!config.ping_on_lease);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder_methods() {
        let config = PoolConfig::new()
            .max_sessions(5)
            .acquire_timeout(Duration::from_secs(60))
            .reset_on_return(false)
            .ping_on_lease(true);

        assert_eq!(config.max_sessions, 5);
        assert_eq!(config.acquire_timeout, Duration::from_secs(60));
        assert!(!config.reset_on_return);
        assert!(config.ping_on_lease);
    }

    #[test]
    fn test_config_validation_zero_max() {
        let result = PoolConfig::new().max_sessions(0).validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("max_sessions must be greater than 0")
        );
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let result = PoolConfig::new().acquire_timeout(Duration::ZERO).validate();
        assert!(result.is_err());
    }
}
