//! Linearizable key/value map with versioned entries
//!
//! Writes are serialized through a single gate so that every mutation gets a
//! strictly increasing version and its [`MapEvent`] is queued to listeners
//! in commit order. Reads never take the gate.

use super::persistence::MapPersistence;
use crate::config::{EventConfig, SdnConfig};
use crate::error::{SdnError, SdnResult};
use crate::event::{EventListener, ListenerId, ListenerRegistry};
use crate::metrics_otel;
use crate::patterns::RetryConfig;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounds required of map keys
pub trait MapKey:
    Clone + Ord + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> MapKey for T where
    T: Clone + Ord + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// Bounds required of map values
pub trait MapValue:
    Clone + PartialEq + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> MapValue for T where
    T: Clone + PartialEq + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// A value together with the version assigned when it was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<V> {
    pub value: V,
    pub version: u64,
    pub creation_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent<K, V> {
    Insert {
        key: K,
        new_value: Versioned<V>,
    },
    Update {
        key: K,
        old_value: Versioned<V>,
        new_value: Versioned<V>,
    },
    Remove {
        key: K,
        old_value: Versioned<V>,
    },
}

impl<K, V> MapEvent<K, V> {
    pub fn key(&self) -> &K {
        match self {
            MapEvent::Insert { key, .. }
            | MapEvent::Update { key, .. }
            | MapEvent::Remove { key, .. } => key,
        }
    }

    pub fn old_value(&self) -> Option<&Versioned<V>> {
        match self {
            MapEvent::Insert { .. } => None,
            MapEvent::Update { old_value, .. } | MapEvent::Remove { old_value, .. } => {
                Some(old_value)
            }
        }
    }

    pub fn new_value(&self) -> Option<&Versioned<V>> {
        match self {
            MapEvent::Insert { new_value, .. } | MapEvent::Update { new_value, .. } => {
                Some(new_value)
            }
            MapEvent::Remove { .. } => None,
        }
    }
}

/// Availability of a distributed primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreStatus {
    Active,
    Suspended,
}

/// Result of a conditional or computed write
#[derive(Debug, Clone, PartialEq)]
pub struct MapUpdate<V> {
    pub old: Option<Versioned<V>>,
    pub new: Option<Versioned<V>>,
}

impl<V> MapUpdate<V> {
    /// Whether the write actually changed the stored entry
    pub fn changed(&self) -> bool {
        self.old.as_ref().map(|v| v.version) != self.new.as_ref().map(|v| v.version)
    }
}

/// Construction options shared by every map of a node
#[derive(Clone)]
pub struct MapOptions {
    pub events: EventConfig,
    pub retry: RetryConfig,
    pub persistence: Option<Arc<MapPersistence>>,
}

impl MapOptions {
    pub fn from_config(config: &SdnConfig, persistence: Option<Arc<MapPersistence>>) -> Self {
        Self {
            events: config.events.clone(),
            retry: RetryConfig::exponential(
                config.mastership.cas_attempts,
                config.mastership.cas_backoff,
            )
            .with_operation_name("map_compute"),
            persistence,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_config(&SdnConfig::default(), None)
    }
}

impl Default for MapOptions {
    fn default() -> Self {
        Self::in_memory()
    }
}

pub struct ConsistentMap<K, V> {
    name: String,
    entries: RwLock<BTreeMap<K, Versioned<V>>>,
    version: AtomicU64,
    status: RwLock<StoreStatus>,
    latency: RwLock<Duration>,
    write_gate: tokio::sync::Mutex<()>,
    listeners: ListenerRegistry<MapEvent<K, V>>,
    status_listeners: ListenerRegistry<StoreStatus>,
    retry: RetryConfig,
    persistence: Option<Arc<MapPersistence>>,
}

impl<K: MapKey, V: MapValue> ConsistentMap<K, V> {
    /// Create the map, reloading persisted entries when persistence is configured
    pub fn new(name: impl Into<String>, options: MapOptions) -> SdnResult<Self> {
        let name = name.into();
        let mut entries = BTreeMap::new();
        let mut max_version = 0;

        if let Some(persistence) = &options.persistence {
            let loaded: Vec<(K, Versioned<V>)> = persistence.load(&name)?;
            for (key, value) in loaded {
                max_version = max_version.max(value.version);
                entries.insert(key, value);
            }
            if !entries.is_empty() {
                info!("Reloaded {} entries into map {}", entries.len(), name);
            }
        }

        Ok(Self {
            listeners: ListenerRegistry::new(name.clone(), options.events.clone()),
            status_listeners: ListenerRegistry::new(format!("{}-status", name), options.events),
            name,
            entries: RwLock::new(entries),
            version: AtomicU64::new(max_version),
            status: RwLock::new(StoreStatus::Active),
            latency: RwLock::new(Duration::ZERO),
            write_gate: tokio::sync::Mutex::new(()),
            retry: options.retry,
            persistence: options.persistence,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> StoreStatus {
        *self.status.read()
    }

    fn ensure_active(&self) -> SdnResult<()> {
        match self.status() {
            StoreStatus::Active => Ok(()),
            StoreStatus::Suspended => Err(SdnError::store_unavailable(&self.name)),
        }
    }

    pub fn get(&self, key: &K) -> SdnResult<Option<Versioned<V>>> {
        self.ensure_active()?;
        Ok(self.entries.read().get(key).cloned())
    }

    pub fn contains_key(&self, key: &K) -> SdnResult<bool> {
        self.ensure_active()?;
        Ok(self.entries.read().contains_key(key))
    }

    /// Keys in ascending order
    pub fn keys(&self) -> SdnResult<Vec<K>> {
        self.ensure_active()?;
        Ok(self.entries.read().keys().cloned().collect())
    }

    pub fn entries(&self) -> SdnResult<Vec<(K, Versioned<V>)>> {
        self.ensure_active()?;
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Store `value`, returning the previous entry
    pub async fn put(&self, key: K, value: V) -> SdnResult<Option<Versioned<V>>> {
        let update = self.write(&key, |_| true, Some(value)).await?;
        Ok(update.and_then(|u| u.old))
    }

    /// Store `value` only when no entry exists; returns the existing entry otherwise
    pub async fn put_if_absent(&self, key: K, value: V) -> SdnResult<Option<Versioned<V>>> {
        match self.write(&key, |current| current.is_none(), Some(value)).await? {
            Some(_) => Ok(None),
            None => self.get(&key),
        }
    }

    pub async fn remove(&self, key: &K) -> SdnResult<Option<Versioned<V>>> {
        let update = self.write(key, |_| true, None).await?;
        Ok(update.and_then(|u| u.old))
    }

    /// Compare-and-swap on the entry version
    pub async fn replace_if_version(&self, key: K, version: u64, value: V) -> SdnResult<bool> {
        let update = self
            .write(
                &key,
                |current| current.map(|v| v.version) == Some(version),
                Some(value),
            )
            .await?;
        Ok(update.is_some())
    }

    pub async fn remove_if_version(&self, key: &K, version: u64) -> SdnResult<bool> {
        let update = self
            .write(key, |current| current.map(|v| v.version) == Some(version), None)
            .await?;
        Ok(update.is_some())
    }

    /// Read, transform and conditionally write an entry
    ///
    /// `f` receives the current value and returns the replacement (`None`
    /// removes the entry). When another writer wins the race the whole cycle
    /// is retried with backoff; `f` may therefore run more than once. An
    /// error from `f` aborts without writing.
    pub async fn compute<F>(&self, key: &K, mut f: F) -> SdnResult<MapUpdate<V>>
    where
        F: FnMut(Option<&V>) -> SdnResult<Option<V>> + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.get(key)?;
            let expected = current.as_ref().map(|v| v.version);
            let next = f(current.as_ref().map(|v| &v.value))?;

            if let Some(update) = self
                .write(key, |c| c.map(|v| v.version) == expected, next)
                .await?
            {
                return Ok(update);
            }

            metrics_otel::record_cas_conflict(&self.name);
            if attempt >= self.retry.max_attempts {
                warn!(
                    "Giving up compute on {:?} in {} after {} conflicts",
                    key, self.name, attempt
                );
                return Err(SdnError::ConcurrentModification {
                    store: self.name.clone(),
                    key: format!("{:?}", key),
                    attempts: attempt,
                });
            }
            let delay = self.retry.delay_for(attempt);
            debug!(
                "Conflict computing {:?} in {}, retrying in {:?}",
                key, self.name, delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Single conditional write. Returns `None` when `check` rejects the
    /// current entry; an update with identical old and new values is a no-op.
    async fn write<C>(&self, key: &K, check: C, value: Option<V>) -> SdnResult<Option<MapUpdate<V>>>
    where
        C: FnOnce(Option<&Versioned<V>>) -> bool + Send,
    {
        self.ensure_active()?;
        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let _gate = self.write_gate.lock().await;
        self.ensure_active()?;

        let current = self.entries.read().get(key).cloned();
        if !check(current.as_ref()) {
            return Ok(None);
        }

        let unchanged = match (&current, &value) {
            (Some(existing), Some(value)) => existing.value == *value,
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return Ok(Some(MapUpdate {
                old: current.clone(),
                new: current,
            }));
        }

        let new = value.map(|value| Versioned {
            value,
            version: self.version.fetch_add(1, Ordering::SeqCst) + 1,
            creation_time: Utc::now(),
        });

        if let Some(persistence) = &self.persistence {
            match &new {
                Some(versioned) => persistence.store(&self.name, key, versioned).await?,
                None => persistence.delete(&self.name, key).await?,
            }
        }

        {
            let mut entries = self.entries.write();
            match &new {
                Some(versioned) => {
                    entries.insert(key.clone(), versioned.clone());
                }
                None => {
                    entries.remove(key);
                }
            }
        }

        let event = match (&current, &new) {
            (None, Some(new_value)) => Some(MapEvent::Insert {
                key: key.clone(),
                new_value: new_value.clone(),
            }),
            (Some(old_value), Some(new_value)) => Some(MapEvent::Update {
                key: key.clone(),
                old_value: old_value.clone(),
                new_value: new_value.clone(),
            }),
            (Some(old_value), None) => Some(MapEvent::Remove {
                key: key.clone(),
                old_value: old_value.clone(),
            }),
            (None, None) => None,
        };
        if let Some(event) = event {
            self.listeners.post(event).await;
        }

        Ok(Some(MapUpdate { old: current, new }))
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener<MapEvent<K, V>>>) -> ListenerId {
        self.listeners.add_listener(listener)
    }

    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove_listener(id).await
    }

    pub fn add_status_listener(&self, listener: Arc<dyn EventListener<StoreStatus>>) -> ListenerId {
        self.status_listeners.add_listener(listener)
    }

    /// Mark the primitive unavailable, as when the replica loses its quorum
    pub async fn suspend(&self) {
        self.set_status(StoreStatus::Suspended).await;
    }

    pub async fn resume(&self) {
        self.set_status(StoreStatus::Active).await;
    }

    async fn set_status(&self, status: StoreStatus) {
        let previous = std::mem::replace(&mut *self.status.write(), status);
        if previous == status {
            return;
        }
        match status {
            StoreStatus::Suspended => {
                warn!("Map {} suspended", self.name);
                metrics_otel::record_store_suspended(&self.name);
            }
            StoreStatus::Active => info!("Map {} active again", self.name),
        }
        self.status_listeners.post(status).await;
    }

    /// Delay applied to every write, simulating replication round trips
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChannelListener;
    use tempfile::TempDir;

    fn map() -> ConsistentMap<String, u32> {
        ConsistentMap::new("test", MapOptions::in_memory()).unwrap()
    }

    #[tokio::test]
    async fn test_versions_increase_and_events_follow_writes() {
        let map = map();
        let (listener, mut rx) = ChannelListener::new("chan");
        map.add_listener(listener);

        assert!(map.put("a".into(), 1).await.unwrap().is_none());
        let old = map.put("a".into(), 2).await.unwrap().unwrap();
        assert_eq!(old.value, 1);
        let current = map.get(&"a".to_string()).unwrap().unwrap();
        assert!(current.version > old.version);
        map.remove(&"a".to_string()).await.unwrap();

        assert!(matches!(rx.recv().await, Some(MapEvent::Insert { .. })));
        assert!(matches!(rx.recv().await, Some(MapEvent::Update { .. })));
        assert!(matches!(rx.recv().await, Some(MapEvent::Remove { .. })));
    }

    #[tokio::test]
    async fn test_identical_put_is_silent() {
        let map = map();
        let (listener, mut rx) = ChannelListener::new("chan");
        map.add_listener(listener);

        map.put("a".into(), 1).await.unwrap();
        let before = map.get(&"a".to_string()).unwrap().unwrap();
        map.put("a".into(), 1).await.unwrap();
        let after = map.get(&"a".to_string()).unwrap().unwrap();

        assert_eq!(before.version, after.version);
        assert!(matches!(rx.recv().await, Some(MapEvent::Insert { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_replace_if_version() {
        let map = map();
        map.put("a".into(), 1).await.unwrap();
        let version = map.get(&"a".to_string()).unwrap().unwrap().version;

        assert!(map.replace_if_version("a".into(), version, 2).await.unwrap());
        assert!(!map.replace_if_version("a".into(), version, 3).await.unwrap());
        assert_eq!(map.get(&"a".to_string()).unwrap().unwrap().value, 2);
    }

    #[tokio::test]
    async fn test_put_if_absent_returns_existing() {
        let map = map();
        assert!(map.put_if_absent("a".into(), 1).await.unwrap().is_none());
        let existing = map.put_if_absent("a".into(), 9).await.unwrap().unwrap();
        assert_eq!(existing.value, 1);
    }

    #[tokio::test]
    async fn test_compute_error_aborts_write() {
        let map = map();
        map.put("a".into(), 1).await.unwrap();
        let result = map
            .compute(&"a".to_string(), |_| Err(SdnError::invalid_operation("noop", "refused")))
            .await;
        assert!(matches!(result, Err(SdnError::InvalidOperation { .. })));
        assert_eq!(map.get(&"a".to_string()).unwrap().unwrap().value, 1);
    }

    #[tokio::test]
    async fn test_concurrent_computes_do_not_lose_updates() {
        let map = Arc::new(map());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let map = map.clone();
            handles.push(tokio::spawn(async move {
                map.compute(&"counter".to_string(), |v| Ok(Some(v.copied().unwrap_or(0) + 1)))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(map.get(&"counter".to_string()).unwrap().unwrap().value, 8);
    }

    #[tokio::test]
    async fn test_suspended_map_rejects_operations() {
        let map = map();
        let (listener, mut rx) = ChannelListener::new("status");
        map.add_status_listener(listener);

        map.suspend().await;
        assert!(matches!(
            map.get(&"a".to_string()),
            Err(SdnError::StoreUnavailable { .. })
        ));
        assert!(map.put("a".into(), 1).await.is_err());
        map.resume().await;
        assert!(map.put("a".into(), 1).await.is_ok());

        assert_eq!(rx.recv().await, Some(StoreStatus::Suspended));
        assert_eq!(rx.recv().await, Some(StoreStatus::Active));
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let persistence = Arc::new(MapPersistence::open(dir.path().join("m.redb"), "maps").unwrap());
        let options = MapOptions {
            persistence: Some(persistence.clone()),
            ..MapOptions::in_memory()
        };

        let version = {
            let map: ConsistentMap<String, u32> = ConsistentMap::new("terms", options.clone()).unwrap();
            map.put("a".into(), 7).await.unwrap();
            map.put("b".into(), 8).await.unwrap();
            map.remove(&"b".to_string()).await.unwrap();
            map.get(&"a".to_string()).unwrap().unwrap().version
        };

        let reopened: ConsistentMap<String, u32> = ConsistentMap::new("terms", options).unwrap();
        assert_eq!(reopened.keys().unwrap(), vec!["a".to_string()]);
        reopened.put("c".into(), 1).await.unwrap();
        assert!(reopened.get(&"c".to_string()).unwrap().unwrap().version > version);
    }
}
