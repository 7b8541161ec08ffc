//! Store configuration.
//!
//! A store is described by a TOML file with a `[store]` table for the
//! coordinates and an optional `[pool]` table for sizing:
//!
//! ```toml
//! [store]
//! host = "127.0.0.1"
//! port = 3306
//! username = "tutor"
//! password = "secret"
//! db = "classroom"
//!
//! [pool]
//! max_connections = 15
//! min_cached = 2
//! max_cached = 5
//! blocking = true
//! connection_lifetime_secs = 3600
//! setsession = ["SET time_zone = '+00:00'"]
//! ```
//!
//! The host can be overridden at deploy time with `EXTERNAL_HOST_IP`.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use sqlpool::{ConnectOptions, PoolConfig};

use crate::error::ConfigError;

/// Environment variable that overrides the configured host.
pub const HOST_OVERRIDE_ENV: &str = "EXTERNAL_HOST_IP";

/// Configuration file used on development machines (macOS).
pub const DEV_CONFIG_FILE: &str = "config_dev.toml";

/// Configuration file used everywhere else.
pub const PROD_CONFIG_FILE: &str = "config_prod.toml";

/// Configuration of one backing store and its pool.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Store coordinates and credentials.
    pub store: StoreSection,
    /// Pool sizing.
    #[serde(default)]
    pub pool: PoolSection,
}

/// Coordinates and credentials of the backing store.
#[derive(Clone, Deserialize)]
pub struct StoreSection {
    /// Server host.
    pub host: String,
    /// Server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// User name.
    #[serde(alias = "username")]
    pub user: String,
    /// Password.
    #[serde(default)]
    pub password: String,
    /// Database to select.
    #[serde(alias = "db")]
    pub database: String,
    /// Session character set.
    #[serde(default = "default_charset")]
    pub charset: String,
}

impl fmt::Debug for StoreSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("charset", &self.charset)
            .finish()
    }
}

/// Pool sizing and connection policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    /// Hard cap on allocated connections.
    pub max_connections: u32,
    /// Connections opened at startup.
    pub min_cached: u32,
    /// Idle cache capacity.
    pub max_cached: u32,
    /// Wait for a connection instead of failing when exhausted.
    pub blocking: bool,
    /// Ping connections on checkout.
    pub ping: bool,
    /// Seconds to wait for a connection. `0` waits indefinitely.
    pub connection_timeout_secs: u64,
    /// Seconds after the last acquisition before a connection is refreshed.
    pub connection_lifetime_secs: u64,
    /// Statements run on every new connection.
    pub setsession: Vec<String>,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_connections: 15,
            min_cached: 2,
            max_cached: 5,
            blocking: true,
            ping: true,
            connection_timeout_secs: 30,
            connection_lifetime_secs: 3600,
            setsession: Vec::new(),
        }
    }
}

fn default_port() -> u16 {
    3306
}

fn default_charset() -> String {
    sqlpool::lifecycle::DEFAULT_CHARSET.to_owned()
}

impl StoreConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded store configuration");
        Self::from_toml_str(&text)
    }

    /// Read the configuration file for this platform from `dir`, then
    /// apply environment overrides.
    pub fn for_profile(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Self::from_file(dir.as_ref().join(profile_file_name()))?.apply_env_overrides())
    }

    /// Apply overrides from the process environment.
    #[must_use]
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up through `lookup`.
    #[must_use]
    pub fn apply_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(host) = lookup(HOST_OVERRIDE_ENV).filter(|h| !h.trim().is_empty()) {
            tracing::debug!(host = %host, "store host overridden by {}", HOST_OVERRIDE_ENV);
            self.store.host = host.trim().to_owned();
        }
        self
    }

    /// Check the configuration can be used to build a pool.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.host.is_empty() {
            return Err(ConfigError::Invalid("store host must not be empty".into()));
        }
        if self.pool.connection_lifetime_secs == 0 {
            return Err(ConfigError::Invalid(
                "connection_lifetime_secs must be greater than 0".into(),
            ));
        }
        self.pool_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Options handed to the driver for every new connection.
    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        let store = &self.store;
        ConnectOptions::new(store.host.clone(), store.port)
            .credentials(store.user.clone(), store.password.clone())
            .database(store.database.clone())
            .charset(store.charset.clone())
    }

    /// Pool configuration derived from the `[pool]` table.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        let pool = &self.pool;
        let config = PoolConfig::new()
            .max_connections(pool.max_connections)
            .min_cached(pool.min_cached)
            .max_cached(pool.max_cached)
            .blocking(pool.blocking)
            .test_on_checkout(pool.ping)
            .setsession(pool.setsession.iter().cloned());

        match pool.connection_timeout_secs {
            0 => config.no_connection_timeout(),
            secs => config.connection_timeout(Duration::from_secs(secs)),
        }
    }

    /// How long the manager trusts a connection after acquiring one.
    #[must_use]
    pub fn connection_lifetime(&self) -> Duration {
        Duration::from_secs(self.pool.connection_lifetime_secs)
    }
}

/// Configuration file name for the current platform.
#[must_use]
pub fn profile_file_name() -> &'static str {
    if cfg!(target_os = "macos") {
        DEV_CONFIG_FILE
    } else {
        PROD_CONFIG_FILE
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        [store]
        host = "10.1.0.4"
        port = 3307
        username = "tutor"
        password = "s3cret"
        db = "classroom"

        [pool]
        max_connections = 4
        min_cached = 1
        max_cached = 2
        blocking = false
        ping = false
        connection_timeout_secs = 0
        connection_lifetime_secs = 60
        setsession = ["SET time_zone = '+00:00'", "SET autocommit = 0"]
    "#;

    const MINIMAL: &str = r#"
        [store]
        host = "localhost"
        user = "root"
        database = "hints"
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = StoreConfig::from_toml_str(FULL).unwrap();

        assert_eq!(config.store.host, "10.1.0.4");
        assert_eq!(config.store.port, 3307);
        assert_eq!(config.store.user, "tutor");
        assert_eq!(config.store.database, "classroom");
        assert_eq!(config.pool.max_connections, 4);
        assert!(!config.pool.blocking);
        assert_eq!(config.connection_lifetime(), Duration::from_secs(60));
        assert!(config.validate().is_ok());

        let pool = config.pool_config();
        assert_eq!(pool.max_connections, 4);
        assert_eq!(pool.min_cached, 1);
        assert_eq!(pool.max_cached, 2);
        assert!(!pool.blocking);
        assert!(!pool.test_on_checkout);
        assert_eq!(pool.connection_timeout, None);
        assert_eq!(
            pool.setsession,
            vec!["SET time_zone = '+00:00'", "SET autocommit = 0"]
        );
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = StoreConfig::from_toml_str(MINIMAL).unwrap();

        assert_eq!(config.store.port, 3306);
        assert_eq!(config.store.password, "");
        assert_eq!(config.store.charset, "utf8mb4");
        assert_eq!(config.pool.max_connections, 15);
        assert_eq!(config.pool.min_cached, 2);
        assert_eq!(config.pool.max_cached, 5);
        assert!(config.pool.blocking);
        assert!(config.pool.setsession.is_empty());
        assert_eq!(config.connection_lifetime(), Duration::from_secs(3600));
        assert_eq!(
            config.pool_config().connection_timeout,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_connect_options_from_config() {
        let options = StoreConfig::from_toml_str(FULL).unwrap().connect_options();

        assert_eq!(options.host, "10.1.0.4");
        assert_eq!(options.port, 3307);
        assert_eq!(options.user, "tutor");
        assert_eq!(options.password, "s3cret");
        assert_eq!(options.database, "classroom");
        assert_eq!(options.charset, "utf8mb4");
    }

    #[test]
    fn test_host_override() {
        let config = StoreConfig::from_toml_str(MINIMAL)
            .unwrap()
            .apply_overrides_from(|key| (key == HOST_OVERRIDE_ENV).then(|| " 172.17.0.1 ".into()));

        assert_eq!(config.store.host, "172.17.0.1");
    }

    #[test]
    fn test_blank_override_is_ignored() {
        let config = StoreConfig::from_toml_str(MINIMAL)
            .unwrap()
            .apply_overrides_from(|_| Some(String::new()));

        assert_eq!(config.store.host, "localhost");
    }

    #[test]
    fn test_missing_store_table_is_parse_error() {
        let err = StoreConfig::from_toml_str("[pool]\nmax_connections = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_pool_sizing() {
        let mut config = StoreConfig::from_toml_str(MINIMAL).unwrap();
        config.pool.min_cached = 9;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_cached"));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = StoreConfig::from_file("/nonexistent/config_prod.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/config_prod.toml"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = StoreConfig::from_toml_str(FULL).unwrap();
        assert!(!format!("{config:?}").contains("s3cret"));
    }
}
