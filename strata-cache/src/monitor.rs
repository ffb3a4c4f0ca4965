//! Group monitor: membership, staleness stamps, and logical transactions.
//!
//! For every group the monitor tracks the set of member fingerprints and the
//! wall-clock stamp of the most recent write, both in the shared backend
//! (so other processes observe them) and in a process-local mirror (so a
//! reader is told STALE exactly once per foreign update, then runs fresh).
//!
//! Monitor bookkeeping lives in the reserved meta-group; the monitor skips
//! itself so stamping a group never recurses.
//!
//! Failure bias: a monitor read never fails the caller. When the shared
//! stamp cannot be fetched the group is reported stale, which forces a
//! revalidation instead of serving a value nobody can vouch for.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

use strata_core::{AggregateError, CacheError, MonitorConfig};

use crate::backend::CacheBackend;
use crate::key::cache_key;
use crate::typed::{decode_envelope, encode_envelope};

/// Reserved namespace for monitor bookkeeping entries.
pub const GROUP_PREFIX: &str = "[STRATA_CACHE_GROUP]";

fn updated_key(group: &str) -> String {
    format!("{GROUP_PREFIX}_{group}_updated")
}

/// Current wall-clock stamp. Nanosecond resolution, so two writes into the
/// same group in quick succession still produce distinct stamps and the
/// stale-exactly-once contract holds.
fn stamp_now() -> i64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_millis())
}

fn members_key(group: &str) -> String {
    format!("{GROUP_PREFIX}_{group}_keys")
}

/// Tracks group membership and last-update stamps, and hands out
/// process-local logical transaction locks per group.
pub struct CacheMonitor {
    backend: Arc<dyn CacheBackend>,
    config: MonitorConfig,
    /// Local mirror of last-observed stamps, keyed by the stamp key.
    group_stamps: RwLock<HashMap<String, i64>>,
    /// Named read/write locks backing logical transactions.
    transactions: RwLock<HashMap<String, Arc<tokio::sync::RwLock<()>>>>,
}

impl CacheMonitor {
    pub fn new(backend: Arc<dyn CacheBackend>, config: MonitorConfig) -> Self {
        Self {
            backend,
            config,
            group_stamps: RwLock::new(HashMap::new()),
            transactions: RwLock::new(HashMap::new()),
        }
    }

    // ------------------------------------------------------------------
    // Shared-backend bookkeeping ops. These go through the raw backend so
    // the monitor never re-enters the typed facade that calls it.
    // ------------------------------------------------------------------

    async fn fetch<T: DeserializeOwned>(
        &self,
        backend: &dyn CacheBackend,
        key: &str,
    ) -> Result<T, CacheError> {
        let fingerprint = cache_key::<T>(&[GROUP_PREFIX, key]);
        let bytes = backend.get(GROUP_PREFIX, &fingerprint).await?;
        decode_envelope(&bytes)
    }

    async fn store<T: Serialize>(
        &self,
        ttl: Duration,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        let fingerprint = cache_key::<T>(&[GROUP_PREFIX, key]);
        let bytes = encode_envelope(value)?;
        self.backend
            .set_with_ttl(ttl, GROUP_PREFIX, &fingerprint, &bytes)
            .await
    }

    fn local_stamp_matches(&self, key: &str, stamp: i64) -> bool {
        matches!(self.group_stamps.read().get(key), Some(v) if *v == stamp)
    }

    fn set_local_stamp(&self, key: &str, stamp: i64) {
        self.group_stamps.write().insert(key.to_string(), stamp);
    }

    // ------------------------------------------------------------------
    // Group membership & staleness
    // ------------------------------------------------------------------

    /// Record a write into `group`: remember the member fingerprint and
    /// advance the group's stamp locally and in the shared backend.
    pub async fn update_group(&self, group: &str, key: &str) -> Result<(), CacheError> {
        if group.eq_ignore_ascii_case(GROUP_PREFIX) {
            return Ok(());
        }
        self.add_group_keys(group, &[key]).await?;
        let now = stamp_now();
        let stamp_key = updated_key(group);
        self.set_local_stamp(&stamp_key, now);
        self.store(self.config.stamp_ttl, &stamp_key, &now).await?;
        debug!(group, key, "stamped group update");
        Ok(())
    }

    /// Merge fingerprints into the group's member set.
    pub async fn add_group_keys(&self, group: &str, keys: &[&str]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        let set_key = members_key(group);
        let mut members: HashSet<String> = match self.fetch(self.backend.as_ref(), &set_key).await
        {
            Ok(found) => found,
            Err(_) => HashSet::new(),
        };
        members.extend(keys.iter().map(|k| (*k).to_string()));
        self.store(self.config.member_ttl, &set_key, &members).await
    }

    /// Fingerprints known to belong to `group`.
    pub async fn group_keys(&self, group: &str) -> Result<HashSet<String>, CacheError> {
        self.fetch(self.backend.as_ref(), &members_key(group)).await
    }

    /// Answer "has this group been written since this process last looked?".
    ///
    /// Reports stale exactly once per foreign update: after adopting the
    /// shared stamp the next probe runs fresh. Errors bias stale and seed a
    /// fresh shared stamp so the cluster converges.
    pub async fn has_group_been_updated(&self, group: &str) -> bool {
        if group.eq_ignore_ascii_case(GROUP_PREFIX) {
            return false;
        }
        let stamp_key = updated_key(group);
        let shared = match self.fetch::<i64>(self.backend.as_ref(), &stamp_key).await {
            Ok(stamp) => stamp,
            Err(err) => {
                debug!(group, error = %err, "failed getting last updated stamp");
                let now = stamp_now();
                if let Err(err) = self.store(self.config.stamp_ttl, &stamp_key, &now).await {
                    debug!(group, error = %err, "failed seeding last updated stamp");
                }
                return true;
            }
        };
        for (_, parent) in self.backend.parent_backends() {
            match self.fetch::<i64>(parent.as_ref(), &stamp_key).await {
                Ok(stamp) if stamp == shared => {}
                Ok(stamp) => {
                    debug!(group, shared, tier = stamp, "tier stamp does not match");
                    return true;
                }
                Err(_) => return true,
            }
        }
        if self.local_stamp_matches(&stamp_key, shared) {
            return false;
        }
        debug!(group, shared, "adopting newer group stamp");
        self.set_local_stamp(&stamp_key, shared);
        true
    }

    /// Delete every member entry of `group`, then the member set itself.
    pub async fn delete_group(&self, group: &str) -> Result<(), CacheError> {
        let members = match self.group_keys(group).await {
            Ok(members) => members,
            Err(CacheError::Miss) => return Ok(()),
            Err(err) => return Err(err),
        };
        let mut errors = AggregateError::new();
        for key in &members {
            if let Err(err) = self.backend.delete_key(key).await {
                errors.push(err);
            }
        }
        let set_key = members_key(group);
        let set_fingerprint = cache_key::<HashSet<String>>(&[GROUP_PREFIX, &set_key]);
        if let Err(err) = self.backend.delete_key(&set_fingerprint).await {
            errors.push(err);
        }
        errors.into_result()
    }

    // ------------------------------------------------------------------
    // Logical transactions (process-local)
    // ------------------------------------------------------------------

    fn transaction_lock(&self, group: &str) -> Arc<tokio::sync::RwLock<()>> {
        let mut map = self.transactions.write();
        Arc::clone(
            map.entry(group.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::RwLock::new(()))),
        )
    }

    /// Acquire the group's logical lock, shared (`read`) or exclusive.
    ///
    /// With a timeout, failing to acquire in time is an error. The guard
    /// releases on drop; nothing re-acquires afterward. This is not a
    /// distributed lock: it only coordinates tasks in this process.
    pub async fn start_transaction(
        &self,
        group: &str,
        timeout: Option<Duration>,
        read: bool,
    ) -> Result<TransactionGuard, CacheError> {
        let lock = self.transaction_lock(group);
        let guard = match (read, timeout) {
            (true, None) => TxGuard::Read(lock.read_owned().await),
            (false, None) => TxGuard::Write(lock.write_owned().await),
            (true, Some(limit)) => TxGuard::Read(
                tokio::time::timeout(limit, lock.read_owned())
                    .await
                    .map_err(|_| CacheError::backend("MONITOR", "transaction lock timed out"))?,
            ),
            (false, Some(limit)) => TxGuard::Write(
                tokio::time::timeout(limit, lock.write_owned())
                    .await
                    .map_err(|_| CacheError::backend("MONITOR", "transaction lock timed out"))?,
            ),
        };
        Ok(TransactionGuard {
            id: format!("{}_{}", group, Uuid::new_v4()),
            group: group.to_string(),
            read,
            _guard: guard,
        })
    }

    /// Block until the group's lock is acquirable in the requested mode,
    /// without holding it. Returns immediately when no transaction was ever
    /// started for the group. Bound the wait with `tokio::time::timeout`.
    pub async fn wait_for_transaction(&self, group: &str, read: bool) {
        let lock = { self.transactions.read().get(group).cloned() };
        let Some(lock) = lock else {
            return;
        };
        if read {
            drop(lock.read_owned().await);
        } else {
            drop(lock.write_owned().await);
        }
    }
}

enum TxGuard {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
}

/// RAII handle for a logical transaction; dropping it ends the transaction.
pub struct TransactionGuard {
    id: String,
    group: String,
    read: bool,
    _guard: TxGuard,
}

impl TransactionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn is_read(&self) -> bool {
        self.read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::typed::TypedCache;
    use strata_core::MemoryCacheConfig;

    fn shared_backend() -> Arc<dyn CacheBackend> {
        Arc::new(MemoryBackend::new(MemoryCacheConfig::default()))
    }

    fn monitor_over(backend: &Arc<dyn CacheBackend>) -> CacheMonitor {
        CacheMonitor::new(Arc::clone(backend), MonitorConfig::default())
    }

    #[tokio::test]
    async fn test_meta_group_never_stale() {
        let backend = shared_backend();
        let monitor = monitor_over(&backend);
        assert!(!monitor.has_group_been_updated(GROUP_PREFIX).await);
    }

    #[tokio::test]
    async fn test_unknown_group_biases_stale_then_settles() {
        let backend = shared_backend();
        let monitor = monitor_over(&backend);
        // no stamp recorded: stale, and a fresh stamp is seeded
        assert!(monitor.has_group_been_updated("accounts").await);
        // the seeded stamp is adopted on the next probe, stale once more
        assert!(monitor.has_group_been_updated("accounts").await);
        // now local and shared agree
        assert!(!monitor.has_group_been_updated("accounts").await);
    }

    #[tokio::test]
    async fn test_update_is_fresh_for_writer_stale_once_for_reader() {
        let backend = shared_backend();
        let writer = monitor_over(&backend);
        let reader = monitor_over(&backend);

        writer.update_group("accounts", "fp-1").await.unwrap();

        // writer already observed its own stamp
        assert!(!writer.has_group_been_updated("accounts").await);

        // a second process sharing the backend is told exactly once
        assert!(reader.has_group_been_updated("accounts").await);
        assert!(!reader.has_group_been_updated("accounts").await);

        // another write flips the reader exactly once again
        writer.update_group("accounts", "fp-2").await.unwrap();
        assert!(reader.has_group_been_updated("accounts").await);
        assert!(!reader.has_group_been_updated("accounts").await);
    }

    #[tokio::test]
    async fn test_group_keys_accumulate() {
        let backend = shared_backend();
        let monitor = monitor_over(&backend);
        monitor.add_group_keys("g", &["a", "b"]).await.unwrap();
        monitor.add_group_keys("g", &["b", "c"]).await.unwrap();
        let keys = monitor.group_keys("g").await.unwrap();
        assert_eq!(keys.len(), 3);
        assert!(keys.contains("a") && keys.contains("b") && keys.contains("c"));
    }

    #[tokio::test]
    async fn test_delete_group_removes_members_and_set() {
        let backend = shared_backend();
        let monitor = Arc::new(monitor_over(&backend));
        let cache = TypedCache::with_monitor(Arc::clone(&backend), Arc::clone(&monitor));

        cache.set("g", "k1", &1i64).await.unwrap();
        cache.set("g", "k2", &2i64).await.unwrap();
        assert_eq!(monitor.group_keys("g").await.unwrap().len(), 2);

        monitor.delete_group("g").await.unwrap();

        // member entries are gone and the set itself was cleared
        assert!(matches!(
            monitor.group_keys("g").await,
            Err(CacheError::Miss)
        ));
        // settle staleness, then the member entries read as misses
        while monitor.has_group_been_updated("g").await {}
        assert!(cache.get::<i64>("g", "k1").await.unwrap_err().is_miss());
        assert!(cache.get::<i64>("g", "k2").await.unwrap_err().is_miss());
    }

    #[tokio::test]
    async fn test_delete_unknown_group_is_ok() {
        let backend = shared_backend();
        let monitor = monitor_over(&backend);
        monitor.delete_group("nothing-here").await.unwrap();
    }

    #[tokio::test]
    async fn test_write_transaction_excludes_writers() {
        let backend = shared_backend();
        let monitor = Arc::new(monitor_over(&backend));

        let guard = monitor
            .start_transaction("g", None, false)
            .await
            .unwrap();
        assert!(!guard.is_read());

        // a second writer cannot acquire while the first holds the lock
        let blocked = monitor
            .start_transaction("g", Some(Duration::from_millis(30)), false)
            .await;
        assert!(blocked.is_err());

        drop(guard);
        let unblocked = monitor
            .start_transaction("g", Some(Duration::from_millis(100)), false)
            .await;
        assert!(unblocked.is_ok());
    }

    #[tokio::test]
    async fn test_read_transactions_share() {
        let backend = shared_backend();
        let monitor = monitor_over(&backend);
        let first = monitor.start_transaction("g", None, true).await.unwrap();
        let second = monitor
            .start_transaction("g", Some(Duration::from_millis(50)), true)
            .await;
        assert!(second.is_ok());
        drop(first);
    }

    #[tokio::test]
    async fn test_wait_for_transaction_no_lock_returns() {
        let backend = shared_backend();
        let monitor = monitor_over(&backend);
        // never started: returns immediately
        monitor.wait_for_transaction("g", true).await;
    }

    #[tokio::test]
    async fn test_wait_for_transaction_waits_for_writer() {
        let backend = shared_backend();
        let monitor = Arc::new(monitor_over(&backend));

        let guard = monitor.start_transaction("g", None, false).await.unwrap();

        let waiter = Arc::clone(&monitor);
        let handle = tokio::spawn(async move {
            waiter.wait_for_transaction("g", true).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("waiter should finish once the writer released")
            .unwrap();
    }
}
