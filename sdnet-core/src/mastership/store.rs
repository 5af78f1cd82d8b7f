//! Mastership term store
//!
//! One [`MastershipRecord`] per device in a [`ConsistentMap`]. Every
//! operation is a single compare-and-swap compute on the device's record,
//! so the term only moves forward and at most one master exists after any
//! write. Events are derived from the map's change stream, which keeps
//! them in commit order per device.

use super::types::{
    MastershipEvent, MastershipInfo, MastershipRecord, MastershipRole, MastershipTerm,
};
use crate::cluster::ClusterMembership;
use crate::error::{SdnError, SdnResult};
use crate::event::{EventListener, ListenerId, ListenerRegistry};
use crate::metrics_otel;
use crate::store::{ConsistentMap, MapEvent, MapOptions, StoreStatus};
use crate::types::{DeviceId, NodeId};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};

const MAP_NAME: &str = "mastership-terms";

type RecordMap = ConsistentMap<DeviceId, MastershipRecord>;

pub struct MastershipStore {
    map: Arc<RecordMap>,
    membership: Arc<ClusterMembership>,
    listeners: Arc<ListenerRegistry<MastershipEvent>>,
}

impl MastershipStore {
    pub fn new(membership: Arc<ClusterMembership>, options: MapOptions) -> SdnResult<Arc<Self>> {
        let map = Arc::new(RecordMap::new(MAP_NAME, options.clone())?);
        let listeners = Arc::new(ListenerRegistry::new("mastership", options.events));

        let watcher = Arc::new(RecordWatcher {
            map: Arc::downgrade(&map),
            listeners: listeners.clone(),
        });
        map.add_listener(watcher.clone());
        map.add_status_listener(watcher);

        Ok(Arc::new(Self {
            map,
            membership,
            listeners,
        }))
    }

    /// The backing map, exposed for suspension handling and tests
    pub fn map(&self) -> &Arc<RecordMap> {
        &self.map
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener<MastershipEvent>>) -> ListenerId {
        self.listeners.add_listener(listener)
    }

    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove_listener(id).await
    }

    async fn update<F>(&self, device_id: &DeviceId, mut f: F) -> SdnResult<Option<MastershipEvent>>
    where
        F: FnMut(&mut MastershipRecord) -> SdnResult<()> + Send,
    {
        let update = self
            .map
            .compute(device_id, |current| {
                let mut record = current.cloned().unwrap_or_default();
                f(&mut record)?;
                Ok(Some(record))
            })
            .await?;

        let event = MastershipEvent::between(
            device_id,
            update.old.as_ref().map(|v| &v.value),
            update.new.as_ref().map(|v| &v.value),
        );
        match &event {
            Some(MastershipEvent::MasterChanged { info, .. }) => {
                info!(
                    "Master of {} is now {:?} (term {})",
                    device_id, info.master, info.term
                );
                metrics_otel::record_master_change(device_id.as_str());
            }
            Some(MastershipEvent::BackupsChanged { .. }) => {
                debug!("Standby list of {} changed", device_id);
                metrics_otel::record_backup_change();
            }
            _ => {}
        }
        Ok(event)
    }

    /// Candidate-side request: join the candidates and, when the device has
    /// no live master, take over
    #[instrument(skip(self))]
    pub async fn request_role(&self, node: &NodeId, device_id: &DeviceId) -> SdnResult<MastershipRole> {
        let membership = self.membership.clone();
        self.update(device_id, |record| {
            if record.master.as_ref() == Some(node) {
                return Ok(());
            }
            if master_is_live(&membership, record) {
                if !record.backups.contains(node) {
                    record.backups.push(node.clone());
                }
            } else {
                let previous = record.master.clone();
                record.promote(Some(node.clone()));
                if let Some(previous) = previous {
                    record.backups.push(previous);
                }
            }
            Ok(())
        })
        .await?;

        self.get_role(node, device_id)
    }

    /// Force `node` to become master; a no-op if it already is
    #[instrument(skip(self))]
    pub async fn set_master(&self, node: &NodeId, device_id: &DeviceId) -> SdnResult<Option<MastershipEvent>> {
        self.update(device_id, |record| {
            if record.master.as_ref() == Some(node) {
                return Ok(());
            }
            let previous = record.master.clone();
            record.promote(Some(node.clone()));
            if let Some(previous) = previous {
                record.backups.insert(0, previous);
            }
            Ok(())
        })
        .await
    }

    /// Make `node` a standby. A master hands over to the next live
    /// standby and becomes the first standby itself; without another live
    /// candidate it relinquishes.
    #[instrument(skip(self))]
    pub async fn set_standby(&self, node: &NodeId, device_id: &DeviceId) -> SdnResult<Option<MastershipEvent>> {
        let membership = self.membership.clone();
        self.update(device_id, |record| {
            if record.master.as_ref() == Some(node) {
                let next = first_live(&membership, &record.backups);
                match next {
                    Some(next) => {
                        record.promote(Some(next));
                        record.backups.insert(0, node.clone());
                    }
                    None => record.promote(None),
                }
            } else if !record.backups.contains(node) {
                record.backups.push(node.clone());
            }
            Ok(())
        })
        .await
    }

    /// Give up every role on the device, promoting the next live standby
    /// when `node` was master
    #[instrument(skip(self))]
    pub async fn relinquish_role(&self, node: &NodeId, device_id: &DeviceId) -> SdnResult<Option<MastershipEvent>> {
        if !self.map.contains_key(device_id)? {
            return Ok(None);
        }
        let membership = self.membership.clone();
        self.update(device_id, |record| {
            record.backups.retain(|b| b != node);
            if record.master.as_ref() == Some(node) {
                let next = first_live(&membership, &record.backups);
                record.promote(next);
            }
            Ok(())
        })
        .await
    }

    /// Move a standby to the bottom of the standby list. Demoting the
    /// current master is rejected.
    #[instrument(skip(self))]
    pub async fn demote(&self, node: &NodeId, device_id: &DeviceId) -> SdnResult<Option<MastershipEvent>> {
        self.update(device_id, |record| {
            if record.master.as_ref() == Some(node) {
                return Err(SdnError::invalid_operation(
                    "demote",
                    format!("{} is the current master of {}", node, device_id),
                ));
            }
            if let Some(position) = record.backups.iter().position(|b| b == node) {
                let demoted = record.backups.remove(position);
                record.backups.push(demoted);
            }
            Ok(())
        })
        .await
    }

    /// Relinquish every role held by `node`, cascading re-election
    #[instrument(skip(self))]
    pub async fn relinquish_all_roles(&self, node: &NodeId) -> SdnResult<Vec<MastershipEvent>> {
        let mut events = Vec::new();
        for (device_id, record) in self.map.entries()? {
            if record.value.role_of(node) == MastershipRole::None {
                continue;
            }
            match self.relinquish_role(node, &device_id).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to relinquish {} for {}: {}", device_id, node, e);
                    return Err(e);
                }
            }
        }
        info!("Relinquished {} roles held by {}", events.len(), node);
        Ok(events)
    }

    /// Elect the first live standby when the master is absent or inactive.
    /// The master is cleared when no live candidate exists.
    #[instrument(skip(self))]
    pub async fn reelect(&self, device_id: &DeviceId) -> SdnResult<Option<MastershipEvent>> {
        let membership = self.membership.clone();
        self.update(device_id, |record| {
            if master_is_live(&membership, record) {
                return Ok(());
            }
            let previous = record.master.clone();
            record.promote(first_live(&membership, &record.backups));
            if let Some(previous) = previous {
                if record.master.as_ref() != Some(&previous) {
                    record.backups.push(previous);
                }
            }
            Ok(())
        })
        .await
    }

    pub fn get_role(&self, node: &NodeId, device_id: &DeviceId) -> SdnResult<MastershipRole> {
        Ok(self
            .map
            .get(device_id)?
            .map(|v| v.value.role_of(node))
            .unwrap_or(MastershipRole::None))
    }

    pub fn get_master(&self, device_id: &DeviceId) -> SdnResult<Option<NodeId>> {
        Ok(self.map.get(device_id)?.and_then(|v| v.value.master))
    }

    /// Master first, then standbys in priority order
    pub fn get_nodes(&self, device_id: &DeviceId) -> SdnResult<Vec<NodeId>> {
        Ok(self
            .map
            .get(device_id)?
            .map(|v| {
                v.value
                    .master
                    .iter()
                    .chain(v.value.backups.iter())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn get_term_for(&self, device_id: &DeviceId) -> SdnResult<Option<MastershipTerm>> {
        Ok(self
            .map
            .get(device_id)?
            .and_then(|v| v.value.mastership_term()))
    }

    pub fn get_mastership(&self, device_id: &DeviceId) -> SdnResult<MastershipInfo> {
        Ok(self
            .map
            .get(device_id)?
            .map(|v| v.value.info())
            .unwrap_or_default())
    }

    /// Devices mastered by `node`
    pub fn get_devices(&self, node: &NodeId) -> SdnResult<Vec<DeviceId>> {
        Ok(self
            .map
            .entries()?
            .into_iter()
            .filter(|(_, v)| v.value.master.as_ref() == Some(node))
            .map(|(device_id, _)| device_id)
            .collect())
    }

    /// Every device with a mastership record, ascending
    pub fn devices(&self) -> SdnResult<Vec<DeviceId>> {
        self.map.keys()
    }

    pub fn record(&self, device_id: &DeviceId) -> SdnResult<Option<MastershipRecord>> {
        Ok(self.map.get(device_id)?.map(|v| v.value))
    }
}

fn first_live(membership: &ClusterMembership, candidates: &[NodeId]) -> Option<NodeId> {
    candidates
        .iter()
        .find(|node| membership.is_active(node))
        .cloned()
}

fn master_is_live(membership: &ClusterMembership, record: &MastershipRecord) -> bool {
    record
        .master
        .as_ref()
        .map(|m| membership.is_active(m))
        .unwrap_or(false)
}

/// Translates map changes and status transitions into mastership events
struct RecordWatcher {
    map: Weak<RecordMap>,
    listeners: Arc<ListenerRegistry<MastershipEvent>>,
}

#[async_trait]
impl EventListener<MapEvent<DeviceId, MastershipRecord>> for RecordWatcher {
    async fn on_event(&self, event: MapEvent<DeviceId, MastershipRecord>) -> SdnResult<()> {
        if let Some(event) = MastershipEvent::between(
            event.key(),
            event.old_value().map(|v| &v.value),
            event.new_value().map(|v| &v.value),
        ) {
            self.listeners.post(event).await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mastership-record-watcher"
    }
}

#[async_trait]
impl EventListener<StoreStatus> for RecordWatcher {
    async fn on_event(&self, status: StoreStatus) -> SdnResult<()> {
        match status {
            StoreStatus::Suspended => {
                warn!("Mastership store suspended, all roles are unknown");
                self.listeners.post(MastershipEvent::Suspended).await;
            }
            StoreStatus::Active => {
                let Some(map) = self.map.upgrade() else {
                    return Ok(());
                };
                info!("Mastership store available again, republishing masters");
                for (device_id, record) in map.entries()? {
                    self.listeners
                        .post(MastershipEvent::MasterChanged {
                            device_id,
                            info: record.value.info(),
                        })
                        .await;
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mastership-status-watcher"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventConfig;
    use crate::event::ChannelListener;

    async fn setup(nodes: &[&str]) -> (Arc<ClusterMembership>, Arc<MastershipStore>) {
        let membership = Arc::new(ClusterMembership::new(
            NodeId::new(nodes[0]),
            EventConfig::default(),
        ));
        for node in &nodes[1..] {
            membership.add_node(NodeId::new(*node)).await;
        }
        let store = MastershipStore::new(membership.clone(), MapOptions::in_memory()).unwrap();
        (membership, store)
    }

    fn n(id: &str) -> NodeId {
        NodeId::new(id)
    }

    #[tokio::test]
    async fn test_first_requester_becomes_master() {
        let (_, store) = setup(&["n1", "n2"]).await;
        let device = DeviceId::new("of:1");

        assert_eq!(store.request_role(&n("n1"), &device).await.unwrap(), MastershipRole::Master);
        assert_eq!(store.request_role(&n("n2"), &device).await.unwrap(), MastershipRole::Standby);
        assert_eq!(store.get_term_for(&device).unwrap().unwrap().term_number, 1);
        assert_eq!(store.get_nodes(&device).unwrap(), vec![n("n1"), n("n2")]);
    }

    #[tokio::test]
    async fn test_set_master_is_idempotent() {
        let (_, store) = setup(&["n1", "n2"]).await;
        let device = DeviceId::new("of:1");
        store.request_role(&n("n1"), &device).await.unwrap();

        assert!(store.set_master(&n("n1"), &device).await.unwrap().is_none());
        assert_eq!(store.get_term_for(&device).unwrap().unwrap().term_number, 1);

        let event = store.set_master(&n("n2"), &device).await.unwrap().unwrap();
        assert!(matches!(event, MastershipEvent::MasterChanged { .. }));
        let term = store.get_term_for(&device).unwrap().unwrap();
        assert_eq!(term, MastershipTerm::new(n("n2"), 2));
        assert_eq!(store.get_role(&n("n1"), &device).unwrap(), MastershipRole::Standby);
    }

    #[tokio::test]
    async fn test_demote_master_rejected_and_standby_moves_down() {
        let (_, store) = setup(&["n1", "n2", "n3"]).await;
        let device = DeviceId::new("of:1");
        for node in ["n1", "n2", "n3"] {
            store.request_role(&n(node), &device).await.unwrap();
        }

        assert!(matches!(
            store.demote(&n("n1"), &device).await,
            Err(SdnError::InvalidOperation { .. })
        ));
        let event = store.demote(&n("n2"), &device).await.unwrap();
        assert!(matches!(event, Some(MastershipEvent::BackupsChanged { .. })));
        assert_eq!(store.get_nodes(&device).unwrap(), vec![n("n1"), n("n3"), n("n2")]);
        assert_eq!(store.get_term_for(&device).unwrap().unwrap().term_number, 1);
    }

    #[tokio::test]
    async fn test_set_standby_on_master_hands_over() {
        let (_, store) = setup(&["n1", "n2"]).await;
        let device = DeviceId::new("of:1");
        store.request_role(&n("n1"), &device).await.unwrap();
        store.request_role(&n("n2"), &device).await.unwrap();

        store.set_standby(&n("n1"), &device).await.unwrap();
        assert_eq!(store.get_master(&device).unwrap(), Some(n("n2")));
        assert_eq!(store.get_role(&n("n1"), &device).unwrap(), MastershipRole::Standby);
    }

    #[tokio::test]
    async fn test_set_standby_without_candidates_relinquishes() {
        let (_, store) = setup(&["n1"]).await;
        let device = DeviceId::new("of:1");
        store.request_role(&n("n1"), &device).await.unwrap();

        store.set_standby(&n("n1"), &device).await.unwrap();
        assert_eq!(store.get_master(&device).unwrap(), None);
    }

    #[tokio::test]
    async fn test_relinquish_promotes_next_live_standby() {
        let (membership, store) = setup(&["n1", "n2", "n3"]).await;
        let device = DeviceId::new("of:1");
        for node in ["n1", "n2", "n3"] {
            store.request_role(&n(node), &device).await.unwrap();
        }
        membership.deactivate(&n("n2")).await;

        store.relinquish_role(&n("n1"), &device).await.unwrap();
        assert_eq!(store.get_master(&device).unwrap(), Some(n("n3")));
        assert_eq!(store.get_term_for(&device).unwrap().unwrap().term_number, 2);
        assert_eq!(store.get_role(&n("n1"), &device).unwrap(), MastershipRole::None);
    }

    #[tokio::test]
    async fn test_relinquish_all_roles() {
        let (_, store) = setup(&["n1", "n2"]).await;
        for device in ["of:1", "of:2"] {
            let device = DeviceId::new(device);
            store.request_role(&n("n1"), &device).await.unwrap();
            store.request_role(&n("n2"), &device).await.unwrap();
        }

        let events = store.relinquish_all_roles(&n("n1")).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(store.get_devices(&n("n1")).unwrap().is_empty());
        assert_eq!(store.get_devices(&n("n2")).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_events_follow_changes_and_suspension() {
        let (_, store) = setup(&["n1", "n2"]).await;
        let (listener, mut rx) = ChannelListener::new("chan");
        store.add_listener(listener);
        let device = DeviceId::new("of:1");

        store.request_role(&n("n1"), &device).await.unwrap();
        store.request_role(&n("n2"), &device).await.unwrap();
        store.set_master(&n("n1"), &device).await.unwrap();

        assert!(matches!(rx.recv().await, Some(MastershipEvent::MasterChanged { .. })));
        assert!(matches!(rx.recv().await, Some(MastershipEvent::BackupsChanged { .. })));

        store.map().suspend().await;
        assert_eq!(rx.recv().await, Some(MastershipEvent::Suspended));
        assert!(store.get_role(&n("n1"), &device).is_err());

        store.map().resume().await;
        match rx.recv().await {
            Some(MastershipEvent::MasterChanged { device_id, info }) => {
                assert_eq!(device_id, device);
                assert_eq!(info.master, Some(n("n1")));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
