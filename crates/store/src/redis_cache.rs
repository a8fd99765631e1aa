//! Redis-backed allocation cache
//!
//! Shares allocations between engine instances. Every write is a single
//! `SET key value NX EX ttl`, so the first writer wins and the retention
//! window is enforced by Redis itself. Operations are attempted once; retry
//! policy belongs to the caller.
//!
//! ```rust,no_run
//! use abtest_store::{AllocationCache, RedisAllocationCache, RedisCacheConfig};
//! use uuid::Uuid;
//!
//! # async fn demo() -> abtest_store::StoreResult<()> {
//! let config = RedisCacheConfig {
//!     url: "redis://localhost:6379".to_string(),
//!     ..Default::default()
//! };
//! let cache = RedisAllocationCache::connect(config).await?;
//!
//! let experiment_id = Uuid::new_v4();
//! cache.set_if_absent(&experiment_id, "user-42", &Uuid::new_v4()).await?;
//! assert!(cache.get(&experiment_id, "user-42").await?.is_some());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

use crate::backend::{allocation_key, AllocationCache};
use crate::error::{StoreError, StoreResult};

const BACKEND: &str = "redis";

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisCacheConfig {
    /// Redis connection URL
    pub url: String,
    /// Key prefix for namespace isolation
    pub key_prefix: String,
    /// Allocation retention window
    pub ttl: Duration,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "abtest:".to_string(),
            ttl: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Allocation cache stored in Redis
#[derive(Clone)]
pub struct RedisAllocationCache {
    connection: ConnectionManager,
    config: RedisCacheConfig,
}

impl RedisAllocationCache {
    /// Connect to Redis
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the URL is invalid or the
    /// connection cannot be established.
    pub async fn connect(config: RedisCacheConfig) -> StoreResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            StoreError::unavailable(BACKEND, format!("Failed to create client: {}", e))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to connect to Redis at {}: {}", config.url, e);
            StoreError::unavailable(BACKEND, format!("Connection failed: {}", e))
        })?;

        debug!("Redis allocation cache connected");
        Ok(Self { connection, config })
    }

    pub fn config(&self) -> &RedisCacheConfig {
        &self.config
    }

    /// Build full key with prefix
    fn build_key(&self, experiment_id: &Uuid, subject_id: &str) -> String {
        format!(
            "{}{}",
            self.config.key_prefix,
            allocation_key(experiment_id, subject_id)
        )
    }

    /// Remaining retention of an allocation, if it exists
    pub async fn ttl(&self, experiment_id: &Uuid, subject_id: &str) -> StoreResult<Option<Duration>> {
        let key = self.build_key(experiment_id, subject_id);
        let mut conn = self.connection.clone();

        let ttl_secs: i64 = conn
            .ttl(&key)
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, format!("TTL failed: {}", e)))?;

        // -2: missing key, -1: no expiry
        Ok(match ttl_secs {
            s if s >= 0 => Some(Duration::from_secs(s as u64)),
            _ => None,
        })
    }
}

#[async_trait]
impl AllocationCache for RedisAllocationCache {
    async fn get(&self, experiment_id: &Uuid, subject_id: &str) -> StoreResult<Option<Uuid>> {
        let key = self.build_key(experiment_id, subject_id);
        let mut conn = self.connection.clone();

        let value: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, format!("GET failed: {}", e)))?;

        value
            .map(|raw| {
                Uuid::parse_str(&raw).map_err(|e| StoreError::Serialization {
                    key: key.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    async fn set_if_absent(
        &self,
        experiment_id: &Uuid,
        subject_id: &str,
        variant_id: &Uuid,
    ) -> StoreResult<bool> {
        let key = self.build_key(experiment_id, subject_id);
        let mut conn = self.connection.clone();

        // Nil reply means the key already existed
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(variant_id.to_string())
            .arg("NX")
            .arg("EX")
            .arg(self.config.ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, format!("SET NX failed: {}", e)))?;

        Ok(reply.is_some())
    }

    async fn invalidate(&self, experiment_id: &Uuid, subject_id: &str) -> StoreResult<()> {
        let key = self.build_key(experiment_id, subject_id);
        let mut conn = self.connection.clone();

        let _: i64 = conn
            .del(&key)
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, format!("DEL failed: {}", e)))?;
        Ok(())
    }
}
