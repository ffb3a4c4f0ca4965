//! In-process cache tier.
//!
//! A time-expiring byte map: entries carry their expiry instant, reads drop
//! expired entries inline, and a background sweeper evicts the rest on a
//! fixed interval so an idle cache does not pin dead payloads.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use strata_core::{CacheError, MemoryCacheConfig};

use crate::backend::CacheBackend;
use crate::metrics::{CacheCommand, OpMetrics};

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process tier backed by a sharded concurrent map.
pub struct MemoryBackend {
    entries: Arc<DashMap<String, StoredEntry>>,
    default_ttl: Duration,
    metrics: OpMetrics,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryBackend {
    /// Create the tier and start its sweeper. Must be called from within a
    /// tokio runtime.
    pub fn new(config: MemoryCacheConfig) -> Self {
        let entries: Arc<DashMap<String, StoredEntry>> = Arc::new(DashMap::new());
        let sweeper = Self::spawn_sweeper(Arc::clone(&entries), config.cleanup_interval);
        Self {
            entries,
            default_ttl: config.default_ttl,
            metrics: OpMetrics::new("memory", config.instance),
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    fn spawn_sweeper(
        entries: Arc<DashMap<String, StoredEntry>>,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let now = Instant::now();
                entries.retain(|_, entry| !entry.is_expired(now));
            }
        })
    }

    /// Number of live (possibly expired-but-unswept) entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn store(&self, ttl: Duration, key: &str, value: &[u8]) {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, _group: &str, key: &str) -> Result<Vec<u8>, CacheError> {
        let started = Instant::now();
        // clone out of the shard guard before any removal on the same key
        let cached = self
            .entries
            .get(key)
            .map(|entry| (entry.value.clone(), entry.is_expired(started)));
        let result = match cached {
            Some((value, false)) => Ok(value),
            Some((_, true)) => {
                self.entries.remove(key);
                Err(CacheError::Miss)
            }
            None => Err(CacheError::Miss),
        };
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
        let started = Instant::now();
        self.store(ttl, key, value);
        let result = Ok(());
        self.metrics
            .observe_write(CacheCommand::Set, started, &result);
        result
    }

    async fn delete_key(&self, key: &str) -> Result<(), CacheError> {
        let started = Instant::now();
        self.entries.remove(key);
        let result = Ok(());
        self.metrics
            .observe_write(CacheCommand::Delete, started, &result);
        result
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn close(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    fn name(&self) -> String {
        format!("MEMORY_{}", self.metrics.instance())
    }
}

impl Drop for MemoryBackend {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}
