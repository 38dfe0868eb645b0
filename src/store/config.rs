//! Store client configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection settings for `RedisStore`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Server address (default: "localhost:6379")
    #[serde(default = "default_addr")]
    pub addr: String,

    /// AUTH password; empty disables AUTH
    #[serde(default)]
    pub password: String,

    /// Logical database selected on every new connection
    #[serde(default)]
    pub db: u32,

    /// Maximum open connections, watched sessions included (default: 10)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connections dialed eagerly on connect (default: 3)
    #[serde(default = "default_min_idle_conns")]
    pub min_idle_conns: usize,

    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    #[serde(default = "default_io_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_io_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_addr() -> String {
    "localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_min_idle_conns() -> usize {
    3
}

fn default_dial_timeout_ms() -> u64 {
    5000
}

fn default_io_timeout_ms() -> u64 {
    3000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            password: String::new(),
            db: 0,
            pool_size: default_pool_size(),
            min_idle_conns: default_min_idle_conns(),
            dial_timeout_ms: default_dial_timeout_ms(),
            read_timeout_ms: default_io_timeout_ms(),
            write_timeout_ms: default_io_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// Config pointing at `addr` with every other field defaulted
    pub fn with_addr(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Check invariants, returning a human-readable reason on failure
    pub fn validate(&self) -> Result<(), String> {
        if self.addr.trim().is_empty() {
            return Err("store.addr must not be empty".to_string());
        }
        // A watch pins one connection for the whole session; the racing
        // writer needs another
        if self.pool_size < 2 {
            return Err("store.pool_size must be at least 2".to_string());
        }
        if self.min_idle_conns > self.pool_size {
            return Err(format!(
                "store.min_idle_conns ({}) must not exceed store.pool_size ({})",
                self.min_idle_conns, self.pool_size
            ));
        }
        if self.dial_timeout_ms == 0 || self.read_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err("store timeouts must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.addr, "localhost:6379");
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.min_idle_conns, 3);
        assert_eq!(config.dial_timeout(), Duration::from_secs(5));
        assert_eq!(config.read_timeout(), Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"addr": "redis:6380"}"#).unwrap();
        assert_eq!(config.addr, "redis:6380");
        assert_eq!(config.write_timeout_ms, 3000);
    }

    #[test]
    fn test_validation() {
        let mut config = StoreConfig::with_addr("localhost:6379");
        config.pool_size = 0;
        assert!(config.validate().is_err());
        config.pool_size = 1;
        assert!(config.validate().unwrap_err().contains("at least 2"));
        config.pool_size = 2;
        config.min_idle_conns = 2;
        assert!(config.validate().is_ok());

        let mut config = StoreConfig::default();
        config.min_idle_conns = 11;
        assert!(config.validate().unwrap_err().contains("min_idle_conns"));

        let mut config = StoreConfig::default();
        config.read_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
