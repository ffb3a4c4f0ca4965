//! Tiered cache composition.
//!
//! Cheap tiers front slower ones. Reads cascade head to tail and back-fill
//! the tiers that missed; writes and deletes fan out to every tier and
//! succeed when at least one tier did. There is no coordination protocol
//! between tiers beyond the fan-out itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use strata_core::{AggregateError, CacheError};

use crate::backend::CacheBackend;

/// Terminal read source consulted when every tier misses.
///
/// Loader results are returned to the caller but are NOT written back into
/// the tiers: back-fill happens only when one tier's hit bypassed others.
///
/// Every [`CacheBackend`] satisfies this contract through its `get`;
/// [`TieredCache::with_backend_loader`] adapts one in place, so a slower
/// backend kept out of the cascade can serve directly as the loader.
#[async_trait]
pub trait CacheSource: Send + Sync {
    async fn load(&self, group: &str, key: &str) -> Result<Vec<u8>, CacheError>;
}

/// Adapter reading a backend's `get` as a terminal source.
struct BackendSource(Arc<dyn CacheBackend>);

#[async_trait]
impl CacheSource for BackendSource {
    async fn load(&self, group: &str, key: &str) -> Result<Vec<u8>, CacheError> {
        self.0.get(group, key).await
    }
}

/// Ordered composite of cache tiers.
pub struct TieredCache {
    tiers: Vec<Arc<dyn CacheBackend>>,
    loader: Option<Arc<dyn CacheSource>>,
}

impl TieredCache {
    pub fn new(tiers: Vec<Arc<dyn CacheBackend>>) -> Self {
        Self {
            tiers,
            loader: None,
        }
    }

    pub fn with_loader(
        tiers: Vec<Arc<dyn CacheBackend>>,
        loader: Arc<dyn CacheSource>,
    ) -> Self {
        Self {
            tiers,
            loader: Some(loader),
        }
    }

    /// Use another backend as the terminal loader, reading through its
    /// `get`.
    pub fn with_backend_loader(
        tiers: Vec<Arc<dyn CacheBackend>>,
        loader: Arc<dyn CacheBackend>,
    ) -> Self {
        Self {
            tiers,
            loader: Some(Arc::new(BackendSource(loader))),
        }
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    /// Fire-and-forget back-fill of the tiers that missed before the hit.
    fn backfill(&self, missed: Vec<Arc<dyn CacheBackend>>, group: &str, key: &str, value: &[u8]) {
        if missed.is_empty() {
            return;
        }
        let group = group.to_string();
        let key = key.to_string();
        let value = value.to_vec();
        tokio::spawn(async move {
            for tier in missed {
                if let Err(err) = tier.set(&group, &key, &value).await {
                    warn!(
                        tier = %tier.name(),
                        group = %group,
                        error = %err,
                        "tier back-fill failed"
                    );
                }
            }
        });
    }

    /// Collapse a fan-out's outcome: ≥1 success wins, all-fail aggregates.
    fn fanout_result(success: bool, errors: AggregateError) -> Result<(), CacheError> {
        if success {
            return Ok(());
        }
        errors.into_result()
    }
}

#[async_trait]
impl CacheBackend for TieredCache {
    async fn get(&self, group: &str, key: &str) -> Result<Vec<u8>, CacheError> {
        let mut missed: Vec<Arc<dyn CacheBackend>> = Vec::new();
        for tier in &self.tiers {
            match tier.get(group, key).await {
                Ok(value) => {
                    self.backfill(missed, group, key, &value);
                    return Ok(value);
                }
                Err(err) => {
                    if !err.is_miss() {
                        warn!(tier = %tier.name(), error = %err, "tier read failed");
                    }
                    missed.push(Arc::clone(tier));
                }
            }
        }
        match &self.loader {
            Some(loader) => loader.load(group, key).await,
            None => Err(CacheError::Miss),
        }
    }

    async fn set(&self, group: &str, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let mut errors = AggregateError::new();
        let mut success = false;
        for tier in &self.tiers {
            match tier.set(group, key, value).await {
                Ok(()) => success = true,
                Err(err) => errors.push(err),
            }
        }
        Self::fanout_result(success, errors)
    }

    async fn set_with_ttl(
        &self,
        ttl: Duration,
        group: &str,
        key: &str,
        value: &[u8],
    ) -> Result<(), CacheError> {
        let mut errors = AggregateError::new();
        let mut success = false;
        for tier in &self.tiers {
            match tier.set_with_ttl(ttl, group, key, value).await {
                Ok(()) => success = true,
                Err(err) => errors.push(err),
            }
        }
        Self::fanout_result(success, errors)
    }

    async fn delete_key(&self, key: &str) -> Result<(), CacheError> {
        let mut errors = AggregateError::new();
        let mut success = false;
        for tier in &self.tiers {
            match tier.delete_key(key).await {
                Ok(()) => success = true,
                Err(err) => errors.push(err),
            }
        }
        Self::fanout_result(success, errors)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut errors = AggregateError::new();
        for tier in &self.tiers {
            if let Err(err) = tier.ping().await {
                errors.push(err);
            }
        }
        errors.into_result()
    }

    async fn close(&self) {
        for tier in &self.tiers {
            tier.close().await;
        }
    }

    fn name(&self) -> String {
        let names: Vec<String> = self.tiers.iter().map(|t| t.name()).collect();
        format!("TIERED_{}", names.join("-"))
    }

    fn parent_backends(&self) -> HashMap<String, Arc<dyn CacheBackend>> {
        if self.tiers.len() <= 1 {
            return HashMap::new();
        }
        self.tiers
            .iter()
            .enumerate()
            .map(|(i, tier)| (i.to_string(), Arc::clone(tier)))
            .collect()
    }
}
