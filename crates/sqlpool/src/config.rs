//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Configuration for the connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Hard cap on simultaneously allocated connections (idle + in use).
    pub max_connections: u32,

    /// Number of idle connections opened when the pool is built.
    pub min_cached: u32,

    /// Capacity of the idle cache.
    ///
    /// Connections returned while the cache is full are closed.
    pub max_cached: u32,

    /// Whether acquisition waits for a connection when the pool is
    /// exhausted, or fails immediately.
    pub blocking: bool,

    /// Whether to ping connections on checkout.
    pub test_on_checkout: bool,

    /// Upper bound on a blocking acquisition. `None` waits indefinitely.
    pub connection_timeout: Option<Duration>,

    /// Statements run on every new connection before it is first handed
    /// out, e.g. `SET time_zone = '+00:00'`.
    pub setsession: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 15,
            min_cached: 2,
            max_cached: 5,
            blocking: true,
            test_on_checkout: true,
            connection_timeout: Some(Duration::from_secs(30)),
            setsession: Vec::new(),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the number of connections opened up front.
    #[must_use]
    pub fn min_cached(mut self, count: u32) -> Self {
        self.min_cached = count;
        self
    }

    /// Set the idle cache capacity.
    #[must_use]
    pub fn max_cached(mut self, count: u32) -> Self {
        self.max_cached = count;
        self
    }

    /// Choose between waiting and failing when the pool is exhausted.
    #[must_use]
    pub fn blocking(mut self, enabled: bool) -> Self {
        self.blocking = enabled;
        self
    }

    /// Enable or disable pinging connections on checkout.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Wait indefinitely for a connection when the pool is exhausted.
    #[must_use]
    pub fn no_connection_timeout(mut self) -> Self {
        self.connection_timeout = None;
        self
    }

    /// Set the session setup statements run on every new connection.
    #[must_use]
    pub fn setsession<I, S>(mut self, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.setsession = statements.into_iter().map(Into::into).collect();
        self
    }

    /// Number of connections opened when the pool is built.
    #[must_use]
    pub fn prewarm_count(&self) -> u32 {
        self.min_cached.min(self.max_connections)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.max_cached == 0 {
            return Err(PoolError::Configuration(
                "max_cached must be greater than 0".into(),
            ));
        }
        if self.min_cached > self.max_cached {
            return Err(PoolError::Configuration(
                "min_cached cannot be greater than max_cached".into(),
            ));
        }
        if self.min_cached > self.max_connections {
            return Err(PoolError::Configuration(
                "min_cached cannot be greater than max_connections".into(),
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
        assert_eq!(config.max_connections, 15);
        assert_eq!(config.min_cached, 2);
        assert_eq!(config.max_cached, 5);
        assert!(config.blocking);
        assert!(config.test_on_checkout);
        assert_eq!(config.connection_timeout, Some(Duration::from_secs(30)));
        assert!(config.setsession.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder_methods() {
        let config = PoolConfig::new()
            .max_connections(2)
            .min_cached(1)
            .max_cached(1)
            .blocking(false)
            .test_on_checkout(false)
            .connection_timeout(Duration::from_millis(250))
            .setsession(["SET time_zone = '+00:00'", "SET autocommit = 0"]);

        assert_eq!(config.max_connections, 2);
        assert_eq!(config.min_cached, 1);
        assert_eq!(config.max_cached, 1);
        assert!(!config.blocking);
        assert!(!config.test_on_checkout);
        assert_eq!(config.connection_timeout, Some(Duration::from_millis(250)));
        assert_eq!(
            config.setsession,
            vec!["SET time_zone = '+00:00'", "SET autocommit = 0"]
        );

        let config = config.no_connection_timeout();
        assert_eq!(config.connection_timeout, None);
    }

    #[test]
    fn test_config_validation_zero_max() {
        let config = PoolConfig::new().max_connections(0).min_cached(0);

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("max_connections must be greater than 0")
        );
    }

    #[test]
    fn test_config_validation_zero_cache() {
        let config = PoolConfig::new().max_cached(0).min_cached(0);

        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("max_cached must be greater than 0")
        );
    }

    #[test]
    fn test_config_validation_min_greater_than_cache() {
        let config = PoolConfig::new().min_cached(4).max_cached(3);

        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("min_cached cannot be greater than max_cached")
        );
    }

    #[test]
    fn test_config_validation_min_greater_than_max() {
        let config = PoolConfig::new()
            .max_connections(2)
            .min_cached(3)
            .max_cached(5);

        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("min_cached cannot be greater than max_connections")
        );
    }

    #[test]
    fn test_cache_larger_than_max_is_allowed() {
        let config = PoolConfig::new().max_connections(2).min_cached(2).max_cached(8);

        assert!(config.validate().is_ok());
        assert_eq!(config.prewarm_count(), 2);
    }
}
