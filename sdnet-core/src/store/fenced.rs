//! Device-scoped map whose writes are fenced by mastership terms

use super::consistent_map::{ConsistentMap, MapKey, MapOptions, MapValue};
use crate::error::{SdnError, SdnResult};
use crate::mastership::MastershipTerm;
use crate::metrics_otel;
use crate::types::DeviceId;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

/// A value tagged with the term under which it was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fenced<V> {
    pub value: V,
    pub term: MastershipTerm,
}

/// Rejects writes carrying a term older than the newest term seen for the
/// device, so a deposed master cannot overwrite its successor's state.
pub struct DeviceFencedMap<K, V> {
    name: String,
    entries: ConsistentMap<(DeviceId, K), Fenced<V>>,
    high_water: ConsistentMap<DeviceId, u64>,
    /// Serializes fenced writes with term observations
    fence: Mutex<()>,
}

impl<K: MapKey, V: MapValue> DeviceFencedMap<K, V> {
    pub fn new(name: impl Into<String>, options: MapOptions) -> SdnResult<Self> {
        let name = name.into();
        Ok(Self {
            entries: ConsistentMap::new(name.clone(), options.clone())?,
            high_water: ConsistentMap::new(format!("{}-terms", name), options)?,
            fence: Mutex::new(()),
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Highest term number recorded for the device
    pub fn current_term(&self, device_id: &DeviceId) -> SdnResult<u64> {
        Ok(self
            .high_water
            .get(device_id)?
            .map(|v| v.value)
            .unwrap_or(0))
    }

    /// Raise the device's high-water mark without writing an entry
    ///
    /// Called when a new term is observed so that writes from the previous
    /// master are rejected even before the new master writes anything.
    pub async fn observe_term(&self, device_id: &DeviceId, term_number: u64) -> SdnResult<()> {
        let _fence = self.fence.lock().await;
        self.high_water
            .compute(device_id, |current| {
                Ok(Some(current.copied().unwrap_or(0).max(term_number)))
            })
            .await?;
        Ok(())
    }

    async fn admit(&self, device_id: &DeviceId, term: &MastershipTerm) -> SdnResult<()> {
        let presented = term.term_number;
        self.high_water
            .compute(device_id, |current| {
                let current = current.copied().unwrap_or(0);
                if presented < current {
                    return Err(self.stale(device_id, presented, current));
                }
                Ok(Some(current.max(presented)))
            })
            .await?;
        Ok(())
    }

    fn stale(&self, device_id: &DeviceId, presented: u64, current: u64) -> SdnError {
        warn!(
            "Rejected write to {} for {} with stale term {} (current {})",
            self.name, device_id, presented, current
        );
        metrics_otel::record_stale_write(&self.name);
        SdnError::StaleTerm {
            device_id: device_id.to_string(),
            presented,
            current,
        }
    }

    /// Write `value` under `term`. The term is checked against the device's
    /// high-water mark and the entry's own term inside the same compute.
    pub async fn put(
        &self,
        device_id: &DeviceId,
        key: K,
        value: V,
        term: &MastershipTerm,
    ) -> SdnResult<()> {
        let _fence = self.fence.lock().await;
        self.admit(device_id, term).await?;
        let fenced = Fenced {
            value,
            term: term.clone(),
        };
        let presented = term.term_number;
        self.entries
            .compute(&(device_id.clone(), key), |existing| {
                let current = self
                    .current_term(device_id)?
                    .max(existing.map(|e| e.term.term_number).unwrap_or(0));
                if presented < current {
                    return Err(self.stale(device_id, presented, current));
                }
                Ok(Some(fenced.clone()))
            })
            .await?;
        Ok(())
    }

    pub async fn remove(
        &self,
        device_id: &DeviceId,
        key: &K,
        term: &MastershipTerm,
    ) -> SdnResult<Option<V>> {
        let _fence = self.fence.lock().await;
        self.admit(device_id, term).await?;
        let presented = term.term_number;
        let update = self
            .entries
            .compute(&(device_id.clone(), key.clone()), |_| {
                let current = self.current_term(device_id)?;
                if presented < current {
                    return Err(self.stale(device_id, presented, current));
                }
                Ok(None)
            })
            .await?;
        Ok(update.old.map(|v| v.value.value))
    }

    /// Drop every entry of the device regardless of term; used when the
    /// device itself is gone
    pub async fn purge_device(&self, device_id: &DeviceId) -> SdnResult<usize> {
        let _fence = self.fence.lock().await;
        let keys: Vec<(DeviceId, K)> = self
            .entries
            .keys()?
            .into_iter()
            .filter(|(device, _)| device == device_id)
            .collect();
        let mut removed = 0;
        for key in keys {
            if self.entries.compute(&key, |_| Ok(None)).await?.changed() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn get(&self, device_id: &DeviceId, key: &K) -> SdnResult<Option<Fenced<V>>> {
        Ok(self
            .entries
            .get(&(device_id.clone(), key.clone()))?
            .map(|v| v.value))
    }

    /// Every entry stored for the device
    pub fn device_entries(&self, device_id: &DeviceId) -> SdnResult<Vec<(K, Fenced<V>)>> {
        Ok(self
            .entries
            .entries()?
            .into_iter()
            .filter(|((device, _), _)| device == device_id)
            .map(|((_, key), value)| (key, value.value))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;

    fn term(node: &str, number: u64) -> MastershipTerm {
        MastershipTerm::new(NodeId::new(node), number)
    }

    #[tokio::test]
    async fn test_stale_term_rejected() {
        let map: DeviceFencedMap<String, u32> =
            DeviceFencedMap::new("flows", MapOptions::in_memory()).unwrap();
        let device = DeviceId::new("of:1");

        map.put(&device, "f1".into(), 1, &term("n1", 1)).await.unwrap();
        map.put(&device, "f1".into(), 2, &term("n2", 2)).await.unwrap();

        let result = map.put(&device, "f1".into(), 3, &term("n1", 1)).await;
        assert!(matches!(
            result,
            Err(SdnError::StaleTerm {
                presented: 1,
                current: 2,
                ..
            })
        ));
        assert_eq!(map.get(&device, &"f1".to_string()).unwrap().unwrap().value, 2);
    }

    #[tokio::test]
    async fn test_observed_term_fences_old_master() {
        let map: DeviceFencedMap<String, u32> =
            DeviceFencedMap::new("routes", MapOptions::in_memory()).unwrap();
        let device = DeviceId::new("of:1");

        map.observe_term(&device, 5).await.unwrap();
        assert_eq!(map.current_term(&device).unwrap(), 5);
        assert!(map.put(&device, "r".into(), 1, &term("n1", 4)).await.is_err());
        assert!(map.remove(&device, &"r".to_string(), &term("n1", 4)).await.is_err());
        assert!(map.put(&device, "r".into(), 1, &term("n2", 5)).await.is_ok());
        assert_eq!(map.device_entries(&device).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_term_cannot_slip_between_admit_and_write() {
        let map: DeviceFencedMap<String, u32> =
            DeviceFencedMap::new("flows", MapOptions::in_memory()).unwrap();
        let device = DeviceId::new("of:1");
        map.entries.set_latency(std::time::Duration::from_millis(50));
        let order = parking_lot::Mutex::new(Vec::new());

        let write = async {
            let result = map.put(&device, "fresh".into(), 1, &term("n1", 1)).await;
            order.lock().push(("put", result.is_ok()));
        };
        let observe = async {
            tokio::task::yield_now().await;
            map.observe_term(&device, 2).await.unwrap();
            order.lock().push(("observe", true));
        };
        tokio::join!(write, observe);

        // a term-1 entry may only exist if it landed before term 2 was seen
        assert_eq!(order.into_inner(), vec![("put", true), ("observe", true)]);
        assert!(map
            .put(&device, "later".into(), 1, &term("n1", 1))
            .await
            .is_err());
        assert!(map.get(&device, &"later".to_string()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_device_ignores_terms() {
        let map: DeviceFencedMap<String, u32> =
            DeviceFencedMap::new("meters", MapOptions::in_memory()).unwrap();
        let of1 = DeviceId::new("of:1");
        let of2 = DeviceId::new("of:2");
        map.put(&of1, "a".into(), 1, &term("n1", 3)).await.unwrap();
        map.put(&of1, "b".into(), 2, &term("n1", 3)).await.unwrap();
        map.put(&of2, "a".into(), 3, &term("n2", 1)).await.unwrap();

        assert_eq!(map.purge_device(&of1).await.unwrap(), 2);
        assert!(map.device_entries(&of1).unwrap().is_empty());
        assert_eq!(map.device_entries(&of2).unwrap().len(), 1);
    }
}
