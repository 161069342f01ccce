//! Cache configuration
//!
//! Built programmatically or from environment variables:
//! - `VOXCACHE_MAX_CACHE_SIZE`: budget in bytes
//! - `VOXCACHE_EVENT_CAPACITY`: events buffered per subscriber

use crate::admission::DEFAULT_MAX_CACHE_SIZE;
use crate::error::ConfigError;

const ENV_MAX_CACHE_SIZE: &str = "VOXCACHE_MAX_CACHE_SIZE";
const ENV_EVENT_CAPACITY: &str = "VOXCACHE_EVENT_CAPACITY";

/// Configuration for a [`Cache`](crate::Cache)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Byte budget for loaded images
    pub max_cache_size: u64,
    /// Events buffered per subscriber before the oldest are dropped
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            event_capacity: 1024,
        }
    }
}

impl CacheConfig {
    /// Set the byte budget
    pub fn with_max_cache_size(mut self, bytes: u64) -> Self {
        self.max_cache_size = bytes;
        self
    }

    /// Set the per-subscriber event buffer
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Load configuration from environment variables
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    /// Returns an error if a variable is set to anything but a positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(bytes) = read_positive(ENV_MAX_CACHE_SIZE)? {
            config.max_cache_size = bytes;
        }
        if let Some(capacity) = read_positive(ENV_EVENT_CAPACITY)? {
            config.event_capacity = capacity as usize;
        }

        Ok(config)
    }
}

fn read_positive(var: &'static str) -> Result<Option<u64>, ConfigError> {
    let Ok(value) = std::env::var(var) else {
        return Ok(None);
    };
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(ConfigError::InvalidValue { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_cache_size, 3 * 1024 * 1024 * 1024);
        assert_eq!(config.event_capacity, 1024);
    }

    #[test]
    fn test_builder_methods() {
        let config = CacheConfig::default()
            .with_max_cache_size(10)
            .with_event_capacity(8);
        assert_eq!(config.max_cache_size, 10);
        assert_eq!(config.event_capacity, 8);
    }

    // Single test touches the environment so parallel tests cannot interfere.
    #[test]
    fn test_from_env() {
        env::set_var(ENV_MAX_CACHE_SIZE, "4096");
        env::remove_var(ENV_EVENT_CAPACITY);
        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.max_cache_size, 4096);
        assert_eq!(config.event_capacity, 1024);

        env::set_var(ENV_MAX_CACHE_SIZE, "0");
        assert!(CacheConfig::from_env().is_err());

        env::set_var(ENV_MAX_CACHE_SIZE, "lots");
        let err = CacheConfig::from_env().unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_CACHE_SIZE));

        env::remove_var(ENV_MAX_CACHE_SIZE);
        assert_eq!(CacheConfig::from_env().unwrap(), CacheConfig::default());
    }
}
