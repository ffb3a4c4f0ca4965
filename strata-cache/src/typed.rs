//! Typed facade over a byte-level backend.
//!
//! Converts `(type, group, key, value)` into backend calls: the key becomes
//! a type-qualified fingerprint, the value rides in a JSON envelope, and
//! every write into a real group notifies the monitor so other readers of
//! that group observe the invalidation.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use strata_core::{CacheError, MonitorConfig};

use crate::backend::CacheBackend;
use crate::key::cache_key;
use crate::monitor::{CacheMonitor, GROUP_PREFIX};

/// Wire wrapper for stored values.
///
/// Wrapping keeps a present-but-default value distinguishable from absence
/// after the JSON round trip: `{"data":0}` is a hit, a missing `data` field
/// is a miss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// Serialize a value into its envelope bytes.
pub(crate) fn encode_envelope<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    serde_json::to_vec(&Envelope { data: value })
        .map_err(|e| CacheError::Serialization(e.to_string()))
}

/// Decode envelope bytes; a missing or null `data` field is a miss.
pub(crate) fn decode_envelope<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CacheError> {
    // Option fields deserialize to None when the key is absent, which is
    // exactly the absence signal the envelope exists to carry.
    #[derive(Deserialize)]
    struct Probe<T> {
        data: Option<T>,
    }
    let probe: Probe<T> =
        serde_json::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))?;
    probe.data.ok_or(CacheError::Miss)
}

/// Typed entry points over a backend plus its group monitor.
///
/// Constructed explicitly at startup; there is no process-wide default
/// cache to fall back to.
#[derive(Clone)]
pub struct TypedCache {
    backend: Arc<dyn CacheBackend>,
    monitor: Arc<CacheMonitor>,
}

impl TypedCache {
    /// Build the facade and its monitor over the given backend.
    pub fn new(backend: Arc<dyn CacheBackend>, monitor_config: MonitorConfig) -> Self {
        let monitor = Arc::new(CacheMonitor::new(Arc::clone(&backend), monitor_config));
        Self { backend, monitor }
    }

    /// Build the facade around an existing monitor (shared across facades).
    pub fn with_monitor(backend: Arc<dyn CacheBackend>, monitor: Arc<CacheMonitor>) -> Self {
        Self { backend, monitor }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn monitor(&self) -> &Arc<CacheMonitor> {
        &self.monitor
    }

    /// Store a value under the backend's default TTL and stamp its group.
    pub async fn set<T: Serialize>(
        &self,
        group: &str,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        let fingerprint = cache_key::<T>(&[group, key]);
        let bytes = encode_envelope(value)?;
        self.backend.set(group, &fingerprint, &bytes).await?;
        if group.eq_ignore_ascii_case(GROUP_PREFIX) {
            return Ok(());
        }
        self.monitor.update_group(group, &fingerprint).await
    }

    /// Store a value with an explicit TTL and stamp its group.
    pub async fn set_with_ttl<T: Serialize>(
        &self,
        ttl: Duration,
        group: &str,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        let fingerprint = cache_key::<T>(&[group, key]);
        let bytes = encode_envelope(value)?;
        if let Err(err) = self
            .backend
            .set_with_ttl(ttl, group, &fingerprint, &bytes)
            .await
        {
            debug!(group, key, error = %err, "failed setting cache");
            return Err(err);
        }
        if group.eq_ignore_ascii_case(GROUP_PREFIX) {
            return Ok(());
        }
        debug!(group, key, "set cache");
        self.monitor.update_group(group, &fingerprint).await
    }

    /// Fetch a value.
    ///
    /// Returns `Err(Updated)` without touching the backend when the group
    /// was invalidated since this process last observed it, and `Err(Miss)`
    /// when the entry is absent.
    pub async fn get<T: DeserializeOwned>(&self, group: &str, key: &str) -> Result<T, CacheError> {
        if !group.is_empty() && self.monitor.has_group_been_updated(group).await {
            debug!(group, key, "group has been updated");
            return Err(CacheError::Updated);
        }
        let fingerprint = cache_key::<T>(&[group, key]);
        let bytes = self.backend.get(group, &fingerprint).await?;
        let value = decode_envelope(&bytes)?;
        debug!(group, key, "using cache");
        Ok(value)
    }

    /// Fetch, or load-and-store on miss/invalidation.
    ///
    /// Loader failures surface as `Err`; a failed write-back of the loaded
    /// value is swallowed (the value is still returned).
    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        ttl: Duration,
        group: &str,
        key: &str,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        match self.get::<T>(group, key).await {
            Ok(value) => Ok(value),
            Err(_) => {
                let value = loader().await?;
                if let Err(err) = self.set_with_ttl(ttl, group, key, &value).await {
                    debug!(group, key, error = %err, "failed caching loaded value");
                }
                Ok(value)
            }
        }
    }

    /// Delete the typed entry for `(group, key)`.
    pub async fn delete<T>(&self, group: &str, key: &str) -> Result<(), CacheError> {
        self.backend
            .delete_key(&cache_key::<T>(&[group, key]))
            .await
    }

    /// Delete a raw (already fingerprinted) key.
    pub async fn delete_key(&self, key: &str) -> Result<(), CacheError> {
        self.backend.delete_key(key).await
    }

    /// Store into an explicit backend, bypassing the monitor stamp. Used by
    /// callers that manage a dedicated result cache.
    pub async fn set_in<T: Serialize>(
        &self,
        backend: &dyn CacheBackend,
        group: &str,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        let fingerprint = cache_key::<T>(&[group, key]);
        let bytes = encode_envelope(value)?;
        backend.set(group, &fingerprint, &bytes).await
    }

    /// Fetch from an explicit backend; group staleness still applies.
    pub async fn get_from<T: DeserializeOwned>(
        &self,
        backend: &dyn CacheBackend,
        group: &str,
        key: &str,
    ) -> Result<T, CacheError> {
        if self.monitor.has_group_been_updated(group).await {
            return Err(CacheError::Updated);
        }
        let fingerprint = cache_key::<T>(&[group, key]);
        let bytes = backend.get(group, &fingerprint).await?;
        decode_envelope(&bytes)
    }
}
