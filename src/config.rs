//! Pool Configuration

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for a connection pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum idle connections retained per endpoint. `None` keeps the pool
    /// unbounded; `0` disables pooling entirely (every acquire creates a new
    /// connection, every release closes it).
    pub pool_size: Option<usize>,
    /// Whether a reconnect after a failed first I/O on a reused connection may
    /// be served from the pool again, or must open a fresh connection.
    pub use_cache_for_reconnects: bool,
    /// Deadline for establishing a new connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Default write deadline used by session leases.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    /// Default read deadline used by session leases.
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Default read chunk size in bytes.
    pub read_buffer_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: Some(5),
            use_cache_for_reconnects: true,
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(20),
            read_timeout: Duration::from_secs(20),
            read_buffer_size: 2048,
        }
    }
}

impl PoolConfig {
    /// True if releases may store connections at all.
    pub fn pooling_enabled(&self) -> bool {
        self.pool_size.map_or(true, |n| n > 0)
    }

    /// True if the bucket has room for one more idle connection.
    pub fn has_capacity(&self, bucket_len: usize) -> bool {
        self.pool_size.map_or(true, |n| bucket_len < n)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.connect_timeout.is_zero() {
            anyhow::bail!("connect_timeout must be non-zero");
        }
        if self.write_timeout.is_zero() {
            anyhow::bail!("write_timeout must be non-zero");
        }
        if self.read_buffer_size == 0 {
            anyhow::bail!("read_buffer_size must be non-zero");
        }
        Ok(())
    }

    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            tracing::info!("Loading pool configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: PoolConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Pool configuration validation failed")?;
            Ok(config)
        } else {
            tracing::warn!(
                "Pool configuration file not found at {}, using defaults",
                path.display()
            );
            let config = PoolConfig::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables, starting from defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = PoolConfig::default();

        if let Ok(size) = std::env::var("CERTPOOL_POOL_SIZE") {
            if size.eq_ignore_ascii_case("none") {
                config.pool_size = None;
            } else {
                config.pool_size = Some(
                    size.parse::<usize>()
                        .with_context(|| format!("Invalid CERTPOOL_POOL_SIZE: {}", size))?,
                );
            }
        }

        if let Ok(cached) = std::env::var("CERTPOOL_USE_CACHE_FOR_RECONNECTS") {
            config.use_cache_for_reconnects = cached
                .parse::<bool>()
                .with_context(|| format!("Invalid CERTPOOL_USE_CACHE_FOR_RECONNECTS: {}", cached))?;
        }

        if let Ok(timeout) = std::env::var("CERTPOOL_CONNECT_TIMEOUT") {
            config.connect_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid CERTPOOL_CONNECT_TIMEOUT: {}", timeout))?;
        }

        if let Ok(timeout) = std::env::var("CERTPOOL_WRITE_TIMEOUT") {
            config.write_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid CERTPOOL_WRITE_TIMEOUT: {}", timeout))?;
        }

        if let Ok(timeout) = std::env::var("CERTPOOL_READ_TIMEOUT") {
            config.read_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid CERTPOOL_READ_TIMEOUT: {}", timeout))?;
        }

        if let Ok(size) = std::env::var("CERTPOOL_READ_BUFFER_SIZE") {
            config.read_buffer_size = size
                .parse::<usize>()
                .with_context(|| format!("Invalid CERTPOOL_READ_BUFFER_SIZE: {}", size))?;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool_size, Some(5));
        assert!(config.use_cache_for_reconnects);
    }

    #[test]
    fn capacity_checks() {
        let mut config = PoolConfig::default();

        config.pool_size = Some(2);
        assert!(config.pooling_enabled());
        assert!(config.has_capacity(1));
        assert!(!config.has_capacity(2));

        config.pool_size = Some(0);
        assert!(!config.pooling_enabled());

        config.pool_size = None;
        assert!(config.pooling_enabled());
        assert!(config.has_capacity(usize::MAX - 1));
    }

    #[test]
    fn zero_write_timeout_is_rejected() {
        let config = PoolConfig {
            write_timeout: Duration::ZERO,
            ..PoolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
pool_size = 3
use_cache_for_reconnects = false
connect_timeout = "5s"
write_timeout = "15s"
read_timeout = "15s"
read_buffer_size = 4096
"#
        )
        .unwrap();

        let config = PoolConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.pool_size, Some(3));
        assert!(!config.use_cache_for_reconnects);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.read_buffer_size, 4096);
    }

    #[test]
    fn env_overrides_and_rejects_invalid_values() {
        // single test for all env scenarios; the process environment is
        // shared, so they must not run concurrently with each other
        std::env::set_var("CERTPOOL_POOL_SIZE", "7");
        std::env::set_var("CERTPOOL_CONNECT_TIMEOUT", "3s");
        std::env::set_var("CERTPOOL_USE_CACHE_FOR_RECONNECTS", "false");
        let config = PoolConfig::from_env().unwrap();
        assert_eq!(config.pool_size, Some(7));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert!(!config.use_cache_for_reconnects);
        // untouched fields keep their defaults
        assert_eq!(config.write_timeout, Duration::from_secs(20));
        assert_eq!(config.read_buffer_size, 2048);

        // "none" lifts the per-endpoint cap entirely
        std::env::set_var("CERTPOOL_POOL_SIZE", "none");
        let config = PoolConfig::from_env().unwrap();
        assert_eq!(config.pool_size, None);

        std::env::set_var("CERTPOOL_POOL_SIZE", "many");
        assert!(PoolConfig::from_env().is_err());
        std::env::set_var("CERTPOOL_POOL_SIZE", "5");
        std::env::set_var("CERTPOOL_CONNECT_TIMEOUT", "soon");
        assert!(PoolConfig::from_env().is_err());

        std::env::remove_var("CERTPOOL_POOL_SIZE");
        std::env::remove_var("CERTPOOL_CONNECT_TIMEOUT");
        std::env::remove_var("CERTPOOL_USE_CACHE_FOR_RECONNECTS");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = PoolConfig::load_from_file(Path::new("/nonexistent/certpool.toml")).unwrap();
        assert_eq!(config.pool_size, Some(5));
    }
}
