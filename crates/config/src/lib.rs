//! Configuration management for the experiment allocation engine

use abtest_types::ABTestConfig;
use figment::{Figment, providers::{Format, Yaml, Env}};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// 30 days, the retention window of an allocation
pub const DEFAULT_ALLOCATION_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Service configuration
    pub service: ServiceConfig,

    /// Allocation cache settings
    pub cache: CacheConfig,

    /// Allocation and decision policy
    pub ab_testing: ABTestConfig,

    /// Observability settings
    pub observability: ObservabilityConfig,
}

impl EngineConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }

        // Override with environment variables (prefixed with ABTEST_)
        figment = figment.merge(Env::prefixed("ABTEST_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::LoadError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.allocation_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "Allocation TTL must be positive".to_string(),
            ));
        }

        if self.cache.backend == CacheBackend::Redis && self.cache.redis_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "Redis URL required for the redis cache backend".to_string(),
            ));
        }

        let alpha = self.ab_testing.significance_level;
        if alpha <= 0.0 || alpha >= 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "Significance level must be between 0 and 1, got {}",
                alpha
            )));
        }

        if self.ab_testing.weight_tolerance < 0.0 {
            return Err(ConfigError::ValidationError(
                "Weight tolerance cannot be negative".to_string(),
            ));
        }

        Ok(())
    }
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "abtest-engine".to_string(),
        }
    }
}

/// Which allocation cache implementation to use
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Memory,
    Redis,
}

/// Allocation cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache implementation
    pub backend: CacheBackend,

    /// Redis connection URL
    pub redis_url: String,

    /// Key prefix for namespace isolation
    pub key_prefix: String,

    /// Allocation retention window in seconds
    pub allocation_ttl_secs: u64,

    /// Maximum entries held by the in-memory cache
    pub max_capacity: u64,
}

impl CacheConfig {
    pub fn allocation_ttl(&self) -> Duration {
        Duration::from_secs(self.allocation_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "abtest:".to_string(),
            allocation_ttl_secs: DEFAULT_ALLOCATION_TTL_SECS,
            max_capacity: 1_000_000,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,

    /// Enable structured JSON logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}
