//! # Configuration Loader
//!
//! Purpose: Turn a partial YAML record into a fully populated
//! [`ConnectionConfig`].
//!
//! ## Design Principles
//! 1. **Total Defaulting**: Every field omitted, empty, or zero is replaced by
//!    a documented default before anything reads it.
//! 2. **Strict Section**: Unknown keys under `cache.usage_cache_db` are
//!    rejected so typos surface as malformed structure.
//! 3. **Pure**: Loading reads one file and has no other side effects.
//!
//! ```yaml
//! cache:
//!   usage_cache_db:
//!     host: "127.0.0.1"
//!     port: "6379"
//!     pool_max_connections: 10
//!     pool_min_connections: 2
//!     pool_max_idle_time: 90m
//! ```

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use kvf_client::{ClientOptions, LocalCacheOptions, PoolOptions};
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Config path used when the caller does not supply one.
pub const DEFAULT_CONFIG_PATH: &str = "configs/rediscache_config.yaml";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_POOL_MAX_CONNECTIONS: usize = 16;
pub const DEFAULT_POOL_MIN_CONNECTIONS: usize = 0;
pub const DEFAULT_POOL_MAX_IDLE_TIME: Duration = Duration::from_secs(3600);
pub const DEFAULT_CLIENT_CACHE_MAX_AGE: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Normalized connection settings, fully populated after defaulting.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// `None` disables AUTH.
    pub password: Option<String>,
    /// Logical database selected on every connection.
    pub database: u32,
    pub pool_max_connections: usize,
    pub pool_min_connections: usize,
    /// Idle connections above the minimum are closed after this long unused.
    pub pool_max_idle_time: Duration,
    pub auto_pipelining: bool,
    pub disable_client_side_cache: bool,
    /// Staleness bound for the local read cache.
    pub client_cache_max_age: Duration,
    pub connect_timeout: Duration,
    /// Bound on the startup probe.
    pub health_check_timeout: Duration,
    /// Socket read/write ceiling when the caller's deadline is looser.
    pub io_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        RawSection::default().into_config()
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("pool_max_connections", &self.pool_max_connections)
            .field("pool_min_connections", &self.pool_min_connections)
            .field("pool_max_idle_time", &self.pool_max_idle_time)
            .field("auto_pipelining", &self.auto_pipelining)
            .field("disable_client_side_cache", &self.disable_client_side_cache)
            .field("client_cache_max_age", &self.client_cache_max_age)
            .field("connect_timeout", &self.connect_timeout)
            .field("health_check_timeout", &self.health_check_timeout)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

impl ConnectionConfig {
    /// Reads and normalizes the config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&text)?;
        debug!(path = %path.display(), addr = %config.address(), "cache config loaded");
        Ok(config)
    }

    /// Loads [`DEFAULT_CONFIG_PATH`] relative to the working directory.
    pub fn load_default() -> ConfigResult<Self> {
        Self::load(DEFAULT_CONFIG_PATH)
    }

    /// Parses and normalizes YAML text without touching the filesystem.
    pub fn from_yaml_str(text: &str) -> ConfigResult<Self> {
        let blank = text
            .lines()
            .map(str::trim)
            .all(|line| line.is_empty() || line.starts_with('#'));
        if blank {
            return Err(ConfigError::Empty);
        }

        let document: serde_yaml::Value = serde_yaml::from_str(text)?;
        if document.is_null() {
            return Err(ConfigError::Empty);
        }

        let file: RawFile = serde_yaml::from_value(document)?;
        let section = file
            .cache
            .and_then(|cache| cache.usage_cache_db)
            .ok_or(ConfigError::MissingSection)?;

        let config = section.into_config();
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants that defaulting cannot repair.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".to_string()));
        }
        if self.pool_max_connections == 0 {
            return Err(ConfigError::Invalid("pool_max_connections must be positive".to_string()));
        }
        if self.pool_min_connections > self.pool_max_connections {
            return Err(ConfigError::Invalid(format!(
                "pool_min_connections ({}) exceeds pool_max_connections ({})",
                self.pool_min_connections, self.pool_max_connections
            )));
        }
        let timeouts = [
            ("connect_timeout", self.connect_timeout),
            ("health_check_timeout", self.health_check_timeout),
            ("io_timeout", self.io_timeout),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| value.is_zero()) {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }
        Ok(())
    }

    /// `host:port`, bracketing bare IPv6 hosts.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Transport options taken verbatim from this config.
    pub fn client_options(&self) -> ClientOptions {
        let local_cache = if self.disable_client_side_cache {
            None
        } else {
            Some(LocalCacheOptions {
                max_age: self.client_cache_max_age,
                ..LocalCacheOptions::default()
            })
        };

        ClientOptions {
            addr: self.address(),
            password: self.password.clone(),
            database: self.database,
            pool: PoolOptions {
                min_connections: self.pool_min_connections,
                max_connections: self.pool_max_connections,
                idle_timeout: self.pool_max_idle_time,
            },
            auto_pipelining: self.auto_pipelining,
            local_cache,
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
        }
    }
}

// Sibling sections belong to other consumers of the same file.
#[derive(Debug, Deserialize)]
struct RawFile {
    cache: Option<RawCache>,
}

#[derive(Debug, Deserialize)]
struct RawCache {
    usage_cache_db: Option<RawSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSection {
    host: Option<String>,
    #[serde(default, deserialize_with = "deserialize_port")]
    port: Option<u16>,
    password: Option<String>,
    database: Option<u32>,
    pool_max_connections: Option<usize>,
    pool_min_connections: Option<usize>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pool_max_idle_time: Option<Duration>,
    auto_pipelining_mode: Option<bool>,
    #[serde(alias = "disable_cache")]
    disable_client_side_cache: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    client_cache_max_age: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    connect_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    health_check_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    io_timeout: Option<Duration>,
}

impl RawSection {
    fn into_config(self) -> ConnectionConfig {
        ConnectionConfig {
            host: non_empty(self.host).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.filter(|port| *port != 0).unwrap_or(DEFAULT_PORT),
            password: non_empty(self.password),
            database: self.database.unwrap_or(0),
            pool_max_connections: self
                .pool_max_connections
                .filter(|max| *max != 0)
                .unwrap_or(DEFAULT_POOL_MAX_CONNECTIONS),
            pool_min_connections: self.pool_min_connections.unwrap_or(DEFAULT_POOL_MIN_CONNECTIONS),
            pool_max_idle_time: non_zero(self.pool_max_idle_time)
                .unwrap_or(DEFAULT_POOL_MAX_IDLE_TIME),
            auto_pipelining: self.auto_pipelining_mode.unwrap_or(false),
            disable_client_side_cache: self.disable_client_side_cache.unwrap_or(true),
            client_cache_max_age: non_zero(self.client_cache_max_age)
                .unwrap_or(DEFAULT_CLIENT_CACHE_MAX_AGE),
            connect_timeout: non_zero(self.connect_timeout).unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            health_check_timeout: non_zero(self.health_check_timeout)
                .unwrap_or(DEFAULT_HEALTH_CHECK_TIMEOUT),
            io_timeout: non_zero(self.io_timeout).unwrap_or(DEFAULT_IO_TIMEOUT),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

fn non_zero(value: Option<Duration>) -> Option<Duration> {
    value.filter(|duration| !duration.is_zero())
}

/// Accepts `"6379"` or `6379`. Empty strings mean "use the default".
fn deserialize_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(serde_yaml::Value::Number(n)) => n
            .as_u64()
            .and_then(|port| u16::try_from(port).ok())
            .filter(|port| *port != 0)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("port {n} is out of range"))),
        Some(serde_yaml::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_yaml::Value::String(s)) => s
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid port {s:?}"))),
        Some(other) => Err(D::Error::custom(format!("expected port, found {other:?}"))),
    }
}

/// Accepts integer seconds (`5400`) or a humantime string (`"5400s"`, `"90m"`).
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(serde_yaml::Value::Number(n)) => n
            .as_u64()
            .map(|secs| Some(Duration::from_secs(secs)))
            .ok_or_else(|| {
                D::Error::custom(format!(
                    "duration {n} must be a non-negative whole number of seconds"
                ))
            }),
        Some(serde_yaml::Value::String(s)) => {
            parse_duration(&s).map(Some).map_err(D::Error::custom)
        }
        Some(other) => Err(D::Error::custom(format!("expected duration, found {other:?}"))),
    }
}

fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(text).map_err(|err| format!("invalid duration {text:?}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_total() {
        let config = ConnectionConfig::default();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.password, None);
        assert_eq!(config.database, 0);
        assert_eq!(config.pool_max_connections, DEFAULT_POOL_MAX_CONNECTIONS);
        assert_eq!(config.pool_min_connections, 0);
        assert_eq!(config.pool_max_idle_time, Duration::from_secs(3600));
        assert!(!config.auto_pipelining);
        assert!(config.disable_client_side_cache);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_humantime_and_plain_seconds() {
        assert_eq!(parse_duration("5400s"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("90m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("5400"), Ok(Duration::from_secs(5400)));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn address_brackets_ipv6() {
        let mut config = ConnectionConfig::default();
        assert_eq!(config.address(), "127.0.0.1:6379");
        config.host = "::1".to_string();
        assert_eq!(config.address(), "[::1]:6379");
    }

    #[test]
    fn client_options_follow_config() {
        let config = ConnectionConfig {
            pool_min_connections: 2,
            pool_max_connections: 10,
            auto_pipelining: true,
            disable_client_side_cache: false,
            password: Some("pw".to_string()),
            database: 3,
            ..ConnectionConfig::default()
        };
        let options = config.client_options();
        assert_eq!(options.addr, "127.0.0.1:6379");
        assert_eq!(options.pool.min_connections, 2);
        assert_eq!(options.pool.max_connections, 10);
        assert_eq!(options.pool.idle_timeout, Duration::from_secs(3600));
        assert!(options.auto_pipelining);
        assert_eq!(options.local_cache.map(|local| local.max_age), Some(Duration::from_secs(5)));
        assert_eq!(options.password.as_deref(), Some("pw"));
        assert_eq!(options.database, 3);
    }

    #[test]
    fn load_default_reads_the_conventional_path() {
        assert_eq!(DEFAULT_CONFIG_PATH, "configs/rediscache_config.yaml");
        match ConnectionConfig::load_default() {
            Err(ConfigError::Read { path, .. }) => {
                assert_eq!(path, Path::new(DEFAULT_CONFIG_PATH));
            }
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[test]
    fn debug_redacts_password() {
        let config = ConnectionConfig {
            password: Some("test-pass".to_string()),
            ..ConnectionConfig::default()
        };
        let printed = format!("{config:?}");
        assert!(!printed.contains("test-pass"));
        assert!(printed.contains("<redacted>"));
    }
}
