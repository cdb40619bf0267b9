use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::{CacheError, MemoryStoreConfig, Result};
use crate::policy::PolicyTable;

/// Main server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: Server,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
    /// Upper bound for every store operation; slower ones count as failures
    pub op_timeout_ms: u64,
    /// `COUNT` hint for each `SCAN` round during pattern deletion
    pub scan_count: usize,
    pub memory: MemoryStoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false, both middlewares pass requests straight through
    pub enabled: bool,
    /// Namespace applied to every key and pattern
    pub key_prefix: String,
    /// Larger responses are passed through uncached
    pub max_body_bytes: usize,
    pub write_queue_capacity: usize,
    pub policies: PolicyTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 15600,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            op_timeout_ms: 250,
            scan_count: 500,
            memory: MemoryStoreConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: "pawcache:".to_string(),
            max_body_bytes: 1024 * 1024,
            write_queue_capacity: 1024,
            policies: PolicyTable::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl ServerConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Apply `PAWCACHE_REDIS_URL` and `PAWCACHE_PORT` from the environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source
    ///
    /// Setting a Redis URL also selects the Redis backend.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("PAWCACHE_REDIS_URL").filter(|url| !url.is_empty()) {
            self.store.backend = StoreBackend::Redis;
            self.store.redis_url = url;
        }

        if let Some(port) = lookup("PAWCACHE_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| CacheError::Config(format!("PAWCACHE_PORT '{}' is not a port", port)))?;
        }

        Ok(())
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.store.op_timeout_ms == 0 {
            return Err(CacheError::Config("store.op_timeout_ms must be positive".into()));
        }
        if self.store.scan_count == 0 {
            return Err(CacheError::Config("store.scan_count must be positive".into()));
        }
        if self.store.backend == StoreBackend::Redis && self.store.redis_url.is_empty() {
            return Err(CacheError::Config(
                "store.redis_url is required for the redis backend".into(),
            ));
        }
        if self.store.memory.max_memory_mb == 0 {
            return Err(CacheError::Config(
                "store.memory.max_memory_mb must be positive".into(),
            ));
        }
        if self.cache.max_body_bytes == 0 {
            return Err(CacheError::Config("cache.max_body_bytes must be positive".into()));
        }
        if self.cache.write_queue_capacity == 0 {
            return Err(CacheError::Config(
                "cache.write_queue_capacity must be positive".into(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(CacheError::Config(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            )));
        }

        self.cache.policies.validate()
    }

    /// Get server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.store.op_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PAWCACHE_REDIS_URL", "redis://cache:6379/1"),
            ("PAWCACHE_PORT", "8080"),
        ]
        .into();

        let mut config = ServerConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.redis_url, "redis://cache:6379/1");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_bad_port_override() {
        let mut config = ServerConfig::default();
        let result = config.apply_overrides(|name| {
            (name == "PAWCACHE_PORT").then(|| "eighty".to_string())
        });
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServerConfig::default();
        config.store.op_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.store.backend = StoreBackend::Redis;
        config.store.redis_url.clear();
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.cache.write_queue_capacity = 0;
        assert!(config.validate().is_err());
    }
}
