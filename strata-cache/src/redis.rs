//! Redis remote tier.
//!
//! Stores raw bytes with a per-entry expiry via the multiplexed async
//! connection. The `enabled` switch mirrors the memcache tier: disabled
//! instances miss on read and no-op on write so a cascade can keep the slot
//! configured while the endpoint is offline.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;

use strata_core::{CacheError, ConfigError, RedisCacheConfig};

use crate::backend::CacheBackend;
use crate::metrics::{CacheCommand, OpMetrics};

/// Redis-backed tier.
#[derive(Debug)]
pub struct RedisBackend {
    client: redis::Client,
    default_ttl: Duration,
    enabled: bool,
    metrics: OpMetrics,
}

impl RedisBackend {
    /// Build the tier from config. An enabled tier with no address is a
    /// configuration error; connecting is deferred to first use.
    pub fn new(config: RedisCacheConfig) -> Result<Self, ConfigError> {
        if config.enabled && config.addr.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "redis.addr".to_string(),
            });
        }
        let addr = if config.addr.is_empty() {
            // never dialed while disabled; gives the client a parsable URL
            "127.0.0.1:6379"
        } else {
            config.addr.as_str()
        };
        let url = if config.password.is_empty() {
            format!("redis://{addr}")
        } else {
            format!("redis://:{}@{addr}", config.password)
        };
        // A disabled tier never dials, but the client is still constructed
        // so enabling is a config change, not a code path change.
        let client = redis::Client::open(url.as_str()).map_err(|e| ConfigError::InvalidValue {
            field: "redis.addr".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            client,
            default_ttl: config.default_ttl,
            enabled: config.enabled,
            metrics: OpMetrics::new("redis", config.instance),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::backend(self.name(), e))
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, _group: &str, key: &str) -> Result<Vec<u8>, CacheError> {
        if !self.enabled {
            return Err(CacheError::Miss);
        }
        let started = Instant::now();
        let result = async {
            let mut conn = self.connection().await?;
            let data: Option<Vec<u8>> = conn
                .get(key)
                .await
                .map_err(|e| CacheError::backend(self.name(), e))?;
            match data {
                Some(bytes) if !bytes.is_empty() => Ok(bytes),
                _ => Err(CacheError::Miss),
            }
        }
        .await;
        self.metrics.observe_read(started, &result);
        result
    }

    async fn set(&self, group: &str, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.set_with_ttl(self.default_ttl, group, key, value).await
    }

    async fn set_with_ttl(
        &self,
        ttl: Duration,
        _group: &str,
        key: &str,
        value: &[u8],
    ) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        let started = Instant::now();
        let result = async {
            let mut conn = self.connection().await?;
            let seconds = ttl.as_secs().max(1);
            conn.set_ex::<_, _, ()>(key, value, seconds)
                .await
                .map_err(|e| CacheError::backend(self.name(), e))
        }
        .await;
        self.metrics
            .observe_write(CacheCommand::Set, started, &result);
        result
    }

    async fn delete_key(&self, key: &str) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        let started = Instant::now();
        let result = async {
            let mut conn = self.connection().await?;
            let _: i64 = conn
                .del(key)
                .await
                .map_err(|e| CacheError::backend(self.name(), e))?;
            Ok(())
        }
        .await;
        self.metrics
            .observe_write(CacheCommand::Delete, started, &result);
        result
    }

    async fn ping(&self) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        let started = Instant::now();
        let result = async {
            let mut conn = self.connection().await?;
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::backend(self.name(), e))?;
            Ok(())
        }
        .await;
        self.metrics
            .observe_write(CacheCommand::Ping, started, &result);
        result
    }

    async fn close(&self) {}

    fn name(&self) -> String {
        format!("REDIS_{}", self.metrics.instance())
    }
}
