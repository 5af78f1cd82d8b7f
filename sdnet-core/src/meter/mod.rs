//! Meters fenced by mastership
//!
//! Meters live beside flow rules and follow the same write discipline: the
//! device's master writes them under its term. Meter ids are allocated per
//! device from `1..=max_meters_per_device`, reusing freed ids lowest first.

use crate::error::{SdnError, SdnResult};
use crate::event::{EventListener, ListenerId};
use crate::mastership::{MastershipEvent, MastershipManager, MastershipTerm};
use crate::store::{ConsistentMap, DeviceFencedMap, Fenced, MapOptions};
use crate::types::DeviceId;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeterId(pub u64);

impl fmt::Display for MeterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "meter:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeterUnit {
    KilobitsPerSecond,
    PacketsPerSecond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeterBandType {
    Drop,
    Remark,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterBand {
    pub band_type: MeterBandType,
    pub rate: u64,
    pub burst: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeterState {
    Added,
    /// Deleted by the master, waiting for the device to drop it
    PendingRemove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    pub id: MeterId,
    pub device_id: DeviceId,
    pub unit: MeterUnit,
    pub bands: Vec<MeterBand>,
    pub app_id: String,
    pub state: MeterState,
}

impl Meter {
    pub fn new(device_id: impl Into<DeviceId>, id: MeterId, unit: MeterUnit, bands: Vec<MeterBand>) -> Self {
        Self {
            id,
            device_id: device_id.into(),
            unit,
            bands,
            app_id: String::new(),
            state: MeterState::Added,
        }
    }

    pub fn with_app(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }
}

/// Id allocation state of one device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterIdPool {
    /// Next never-used id; 0 until the first allocation
    next: u64,
    free: BTreeSet<u64>,
}

impl MeterIdPool {
    fn allocate(&mut self, max: u64) -> Option<u64> {
        if let Some(id) = self.free.pop_first() {
            return Some(id);
        }
        let id = self.next.max(1);
        if id > max {
            return None;
        }
        self.next = id + 1;
        Some(id)
    }

    /// Returns false for ids never handed out or already free
    fn release(&mut self, id: u64) -> bool {
        if id == 0 || id >= self.next {
            return false;
        }
        self.free.insert(id)
    }

    pub fn allocated(&self) -> usize {
        (self.next.saturating_sub(1) as usize).saturating_sub(self.free.len())
    }
}

pub struct MeterStore {
    mastership: Arc<MastershipManager>,
    meters: Arc<DeviceFencedMap<MeterId, Meter>>,
    ids: Arc<ConsistentMap<DeviceId, MeterIdPool>>,
    max_meters: u64,
    follower: Mutex<Option<ListenerId>>,
}

impl MeterStore {
    pub fn new(
        mastership: Arc<MastershipManager>,
        options: MapOptions,
        max_meters: u64,
    ) -> SdnResult<Arc<Self>> {
        let meters = Arc::new(DeviceFencedMap::new("meters", options.clone())?);
        let ids = Arc::new(ConsistentMap::new("meter-ids", options)?);
        Ok(Self::with_tables(mastership, meters, ids, max_meters))
    }

    /// Build on existing tables, e.g. ones shared by several nodes
    pub fn with_tables(
        mastership: Arc<MastershipManager>,
        meters: Arc<DeviceFencedMap<MeterId, Meter>>,
        ids: Arc<ConsistentMap<DeviceId, MeterIdPool>>,
        max_meters: u64,
    ) -> Arc<Self> {
        let follower = mastership.add_listener(Arc::new(MeterTermFollower {
            meters: Arc::downgrade(&meters),
        }));
        Arc::new(Self {
            mastership,
            meters,
            ids,
            max_meters,
            follower: Mutex::new(Some(follower)),
        })
    }

    pub fn meters(&self) -> &Arc<DeviceFencedMap<MeterId, Meter>> {
        &self.meters
    }

    pub fn id_pools(&self) -> &Arc<ConsistentMap<DeviceId, MeterIdPool>> {
        &self.ids
    }

    /// Stop following mastership terms
    pub async fn stop(&self) {
        let follower = self.follower.lock().take();
        if let Some(id) = follower {
            self.mastership.remove_listener(id).await;
        }
    }

    fn local_term(&self, device_id: &DeviceId) -> SdnResult<MastershipTerm> {
        let not_master = || SdnError::NotMaster {
            node_id: self.mastership.local_node().to_string(),
            device_id: device_id.to_string(),
        };
        if !self.mastership.is_local_master(device_id) {
            return Err(not_master());
        }
        self.mastership
            .get_mastership_term(device_id)?
            .ok_or_else(not_master)
    }

    fn check_index(&self, id: MeterId) -> SdnResult<()> {
        if id.0 == 0 || id.0 > self.max_meters {
            return Err(SdnError::validation(
                "meter.id",
                format!("{} outside 1..={}", id.0, self.max_meters),
            ));
        }
        Ok(())
    }

    /// Store a meter, replacing any meter with the same id on the device
    #[instrument(skip(self, meter), fields(device = %meter.device_id, meter = %meter.id))]
    pub async fn add_or_update_meter(&self, meter: Meter) -> SdnResult<()> {
        let term = self.local_term(&meter.device_id)?;
        self.add_or_update_with_term(meter, &term).await
    }

    pub async fn add_or_update_with_term(&self, mut meter: Meter, term: &MastershipTerm) -> SdnResult<()> {
        self.check_index(meter.id)?;
        meter.state = MeterState::Added;
        let device_id = meter.device_id.clone();
        self.meters.put(&device_id, meter.id, meter, term).await?;
        debug!("Stored meter on {} (term {})", device_id, term.term_number);
        Ok(())
    }

    /// Mark a meter for removal; it stays stored until purged
    #[instrument(skip(self))]
    pub async fn delete_meter(&self, device_id: &DeviceId, id: MeterId) -> SdnResult<Option<Meter>> {
        let term = self.local_term(device_id)?;
        let Some(current) = self.meters.get(device_id, &id)? else {
            return Ok(None);
        };
        let mut meter = current.value;
        if meter.state != MeterState::PendingRemove {
            meter.state = MeterState::PendingRemove;
            self.meters.put(device_id, id, meter.clone(), &term).await?;
        }
        Ok(Some(meter))
    }

    /// Drop a meter the device no longer holds and free its id
    #[instrument(skip(self))]
    pub async fn purge_meter(&self, device_id: &DeviceId, id: MeterId) -> SdnResult<Option<Meter>> {
        let term = self.local_term(device_id)?;
        let removed = self.meters.remove(device_id, &id, &term).await?;
        if removed.is_some() {
            self.release(device_id, id).await?;
        }
        Ok(removed)
    }

    /// Allocate the lowest free meter id of the device
    #[instrument(skip(self))]
    pub async fn allocate_meter_id(&self, device_id: &DeviceId) -> SdnResult<MeterId> {
        self.local_term(device_id)?;
        let max = self.max_meters;
        let mut allocated = None;
        self.ids
            .compute(device_id, |pool| {
                let mut pool = pool.cloned().unwrap_or_default();
                allocated = pool.allocate(max);
                Ok(Some(pool))
            })
            .await?;
        match allocated {
            Some(id) => Ok(MeterId(id)),
            None => {
                warn!("No free meter ids left on {}", device_id);
                Err(SdnError::invalid_operation(
                    "allocate_meter_id",
                    format!("all {} meter ids of {} are in use", max, device_id),
                ))
            }
        }
    }

    /// Return an id to the device's pool; ids never allocated are ignored
    #[instrument(skip(self))]
    pub async fn free_meter_id(&self, device_id: &DeviceId, id: MeterId) -> SdnResult<bool> {
        self.local_term(device_id)?;
        self.release(device_id, id).await
    }

    async fn release(&self, device_id: &DeviceId, id: MeterId) -> SdnResult<bool> {
        let mut released = false;
        self.ids
            .compute(device_id, |pool| {
                let Some(mut pool) = pool.cloned() else {
                    released = false;
                    return Ok(None);
                };
                released = pool.release(id.0);
                Ok(Some(pool))
            })
            .await?;
        if !released {
            debug!("Ignored free of unallocated {} on {}", id, device_id);
        }
        Ok(released)
    }

    /// Forget every meter and id of a device that left the network; not
    /// gated on mastership
    #[instrument(skip(self))]
    pub async fn purge_meters(&self, device_id: &DeviceId) -> SdnResult<usize> {
        let removed = self.meters.purge_device(device_id).await?;
        self.ids.compute(device_id, |_| Ok(None)).await?;
        if removed > 0 {
            info!("Purged {} meters of {}", removed, device_id);
        }
        Ok(removed)
    }

    pub fn get_meter(&self, device_id: &DeviceId, id: MeterId) -> SdnResult<Option<Fenced<Meter>>> {
        self.meters.get(device_id, &id)
    }

    pub fn get_meters(&self, device_id: &DeviceId) -> SdnResult<Vec<Meter>> {
        Ok(self
            .meters
            .device_entries(device_id)?
            .into_iter()
            .map(|(_, fenced)| fenced.value)
            .collect())
    }

    pub fn meter_count(&self) -> usize {
        self.meters.len()
    }
}

struct MeterTermFollower {
    meters: Weak<DeviceFencedMap<MeterId, Meter>>,
}

#[async_trait]
impl EventListener<MastershipEvent> for MeterTermFollower {
    async fn on_event(&self, event: MastershipEvent) -> SdnResult<()> {
        if let (MastershipEvent::MasterChanged { device_id, info }, Some(meters)) =
            (&event, self.meters.upgrade())
        {
            meters.observe_term(device_id, info.term).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "meter-term-follower"
    }

    fn is_relevant(&self, event: &MastershipEvent) -> bool {
        matches!(event, MastershipEvent::MasterChanged { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterMembership;
    use crate::config::{EventConfig, MastershipConfig};
    use crate::mastership::{MastershipRole, MastershipStore};
    use crate::types::NodeId;

    fn meter(device: &str, id: u64) -> Meter {
        Meter::new(
            device,
            MeterId(id),
            MeterUnit::KilobitsPerSecond,
            vec![MeterBand {
                band_type: MeterBandType::Drop,
                rate: 1000,
                burst: 100,
            }],
        )
        .with_app("test")
    }

    async fn setup(max: u64) -> (Arc<MastershipManager>, Arc<MeterStore>) {
        let membership = Arc::new(ClusterMembership::new(NodeId::new("n1"), EventConfig::default()));
        membership.add_node(NodeId::new("n2")).await;
        let store = MastershipStore::new(membership, MapOptions::in_memory()).unwrap();
        let manager = MastershipManager::new(NodeId::new("n1"), store, MastershipConfig::default());
        let meters = MeterStore::new(manager.clone(), MapOptions::in_memory(), max).unwrap();
        (manager, meters)
    }

    #[tokio::test]
    async fn test_only_master_writes_meters() {
        let (manager, meters) = setup(8).await;
        let device = DeviceId::new("of:1");
        assert!(matches!(
            meters.add_or_update_meter(meter("of:1", 1)).await,
            Err(SdnError::NotMaster { .. })
        ));
        assert!(matches!(
            meters.allocate_meter_id(&device).await,
            Err(SdnError::NotMaster { .. })
        ));

        manager.request_role_for(&device).await.unwrap();
        let id = meters.allocate_meter_id(&device).await.unwrap();
        meters.add_or_update_meter(meter("of:1", id.0)).await.unwrap();
        assert_eq!(meters.get_meters(&device).unwrap().len(), 1);
        assert_eq!(meters.meter_count(), 1);
    }

    #[tokio::test]
    async fn test_ids_are_reused_lowest_first() {
        let (manager, meters) = setup(3).await;
        let device = DeviceId::new("of:1");
        manager.request_role_for(&device).await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(meters.allocate_meter_id(&device).await.unwrap());
        }
        assert_eq!(ids, vec![MeterId(1), MeterId(2), MeterId(3)]);
        let pool = meters.id_pools().get(&device).unwrap().unwrap().value;
        assert_eq!(pool.allocated(), 3);
        assert!(matches!(
            meters.allocate_meter_id(&device).await,
            Err(SdnError::InvalidOperation { .. })
        ));

        assert!(meters.free_meter_id(&device, MeterId(2)).await.unwrap());
        assert!(!meters.free_meter_id(&device, MeterId(2)).await.unwrap());
        assert!(!meters.free_meter_id(&device, MeterId(7)).await.unwrap());
        assert_eq!(meters.allocate_meter_id(&device).await.unwrap(), MeterId(2));
    }

    #[tokio::test]
    async fn test_delete_marks_then_purge_frees() {
        let (manager, meters) = setup(8).await;
        let device = DeviceId::new("of:1");
        manager.request_role_for(&device).await.unwrap();
        let id = meters.allocate_meter_id(&device).await.unwrap();
        meters.add_or_update_meter(meter("of:1", id.0)).await.unwrap();

        let deleted = meters.delete_meter(&device, id).await.unwrap().unwrap();
        assert_eq!(deleted.state, MeterState::PendingRemove);
        assert_eq!(meters.meter_count(), 1);
        assert!(meters.delete_meter(&device, MeterId(5)).await.unwrap().is_none());

        meters.purge_meter(&device, id).await.unwrap();
        assert_eq!(meters.meter_count(), 0);
        assert_eq!(meters.allocate_meter_id(&device).await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_out_of_range_index_is_rejected() {
        let (manager, meters) = setup(4).await;
        manager.request_role_for(&DeviceId::new("of:1")).await.unwrap();
        for id in [0, 5] {
            assert!(matches!(
                meters.add_or_update_meter(meter("of:1", id)).await,
                Err(SdnError::Validation { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_deposed_master_cannot_touch_meters() {
        let (manager, meters) = setup(8).await;
        let device = DeviceId::new("of:1");
        manager.request_role_for(&device).await.unwrap();
        let old_term = manager.get_mastership_term(&device).unwrap().unwrap();
        meters.add_or_update_meter(meter("of:1", 1)).await.unwrap();

        manager
            .set_role(&NodeId::new("n2"), &device, MastershipRole::Master)
            .await
            .unwrap();
        let result = meters.add_or_update_with_term(meter("of:1", 2), &old_term).await;
        assert!(matches!(result, Err(SdnError::StaleTerm { presented: 1, current: 2, .. })));
        assert!(matches!(
            meters.delete_meter(&device, MeterId(1)).await,
            Err(SdnError::NotMaster { .. })
        ));
    }

    #[tokio::test]
    async fn test_purge_meters_clears_device_without_mastership() {
        let (manager, meters) = setup(8).await;
        let (a, b) = (DeviceId::new("of:1"), DeviceId::new("of:2"));
        manager.request_role_for(&a).await.unwrap();
        manager.request_role_for(&b).await.unwrap();
        for device in [&a, &b] {
            let id = meters.allocate_meter_id(device).await.unwrap();
            meters
                .add_or_update_meter(meter(device.as_str(), id.0))
                .await
                .unwrap();
        }
        manager.relinquish_mastership(&a).await.unwrap();

        assert_eq!(meters.purge_meters(&a).await.unwrap(), 1);
        assert!(meters.get_meters(&a).unwrap().is_empty());
        assert_eq!(meters.get_meters(&b).unwrap().len(), 1);
        assert!(meters.id_pools().get(&a).unwrap().is_none());
    }
}
