//! Per-node mastership API
//!
//! [`MastershipManager`] answers role questions for the local node and
//! drives role changes through the [`MastershipStore`]. Reads never trigger
//! an election; the `*_with_timeout` wrappers bound the wait on the store
//! and fall back to [`MastershipRole::None`].

use super::store::MastershipStore;
use super::types::{MastershipEvent, MastershipInfo, MastershipRole, MastershipTerm};
use crate::config::MastershipConfig;
use crate::error::{SdnError, SdnResult};
use crate::event::{EventListener, ListenerId};
use crate::types::{DeviceId, NodeId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};

/// Southbound hook that tells a device which role this node holds
#[async_trait]
pub trait RoleApplier: Send + Sync {
    async fn apply_role(
        &self,
        node: &NodeId,
        device_id: &DeviceId,
        role: MastershipRole,
    ) -> SdnResult<()>;
}

pub struct MastershipManager {
    local: NodeId,
    store: Arc<MastershipStore>,
    config: MastershipConfig,
    role_sync: Mutex<Option<ListenerId>>,
}

impl MastershipManager {
    pub fn new(local: NodeId, store: Arc<MastershipStore>, config: MastershipConfig) -> Arc<Self> {
        Arc::new(Self {
            local,
            store,
            config,
            role_sync: Mutex::new(None),
        })
    }

    /// Push local role changes to devices through `applier`. A device that
    /// refuses the master role is relinquished so another node can take it.
    pub async fn set_role_applier(&self, applier: Arc<dyn RoleApplier>) {
        let listener = Arc::new(RoleSync {
            local: self.local.clone(),
            store: Arc::downgrade(&self.store),
            applier,
        });
        let id = self.store.add_listener(listener);
        let previous = self.role_sync.lock().replace(id);
        if let Some(previous) = previous {
            self.store.remove_listener(previous).await;
        }
    }

    /// Stop pushing role changes to devices
    pub async fn clear_role_applier(&self) {
        let current = self.role_sync.lock().take();
        if let Some(id) = current {
            self.store.remove_listener(id).await;
        }
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local
    }

    pub fn store(&self) -> &Arc<MastershipStore> {
        &self.store
    }

    /// Role of the local node; `None` while the store is unavailable
    pub fn get_local_role(&self, device_id: &DeviceId) -> MastershipRole {
        match self.store.get_role(&self.local, device_id) {
            Ok(role) => role,
            Err(e) => {
                debug!("Role of {} unknown: {}", device_id, e);
                MastershipRole::None
            }
        }
    }

    pub fn is_local_master(&self, device_id: &DeviceId) -> bool {
        self.get_local_role(device_id) == MastershipRole::Master
    }

    /// Contend for the device
    #[instrument(skip(self), fields(node = %self.local))]
    pub async fn request_role_for(&self, device_id: &DeviceId) -> SdnResult<MastershipRole> {
        let role = self.store.request_role(&self.local, device_id).await?;
        info!("Local role for {} is {}", device_id, role);
        Ok(role)
    }

    /// [`Self::request_role_for`] bounded by the configured sync timeout
    pub async fn request_role_with_timeout(&self, device_id: &DeviceId) -> MastershipRole {
        let timeout = self.config.sync_timeout;
        match tokio::time::timeout(timeout, self.request_role_for(device_id)).await {
            Ok(Ok(role)) => role,
            Ok(Err(e)) => {
                warn!("Role request for {} failed: {}", device_id, e);
                MastershipRole::None
            }
            Err(_) => {
                warn!(
                    "{}",
                    SdnError::timeout(format!("request_role({})", device_id), timeout)
                );
                MastershipRole::None
            }
        }
    }

    #[instrument(skip(self), fields(node = %self.local))]
    pub async fn relinquish_mastership(&self, device_id: &DeviceId) -> SdnResult<()> {
        self.store.relinquish_role(&self.local, device_id).await?;
        Ok(())
    }

    pub fn get_master_for(&self, device_id: &DeviceId) -> SdnResult<Option<NodeId>> {
        self.store.get_master(device_id)
    }

    /// Master first, then standbys in priority order
    pub fn get_nodes_for(&self, device_id: &DeviceId) -> SdnResult<Vec<NodeId>> {
        self.store.get_nodes(device_id)
    }

    pub fn get_mastership_term(&self, device_id: &DeviceId) -> SdnResult<Option<MastershipTerm>> {
        self.store.get_term_for(device_id)
    }

    pub fn get_mastership(&self, device_id: &DeviceId) -> SdnResult<MastershipInfo> {
        self.store.get_mastership(device_id)
    }

    /// Devices mastered by `node`
    pub fn get_devices_of(&self, node: &NodeId) -> SdnResult<Vec<DeviceId>> {
        self.store.get_devices(node)
    }

    /// Administrative role assignment for any node
    #[instrument(skip(self))]
    pub async fn set_role(
        &self,
        node: &NodeId,
        device_id: &DeviceId,
        role: MastershipRole,
    ) -> SdnResult<Option<MastershipEvent>> {
        match role {
            MastershipRole::Master => self.store.set_master(node, device_id).await,
            MastershipRole::Standby => self.store.set_standby(node, device_id).await,
            MastershipRole::None => self.store.relinquish_role(node, device_id).await,
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener<MastershipEvent>>) -> ListenerId {
        self.store.add_listener(listener)
    }

    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        self.store.remove_listener(id).await
    }
}

struct RoleSync {
    local: NodeId,
    store: Weak<MastershipStore>,
    applier: Arc<dyn RoleApplier>,
}

#[async_trait]
impl EventListener<MastershipEvent> for RoleSync {
    async fn on_event(&self, event: MastershipEvent) -> SdnResult<()> {
        let (device_id, info) = match &event {
            MastershipEvent::MasterChanged { device_id, info } => (device_id, info),
            _ => return Ok(()),
        };
        let role = info.role_of(&self.local);
        if let Err(e) = self.applier.apply_role(&self.local, device_id, role).await {
            warn!("Device {} rejected role {}: {}", device_id, role, e);
            if role == MastershipRole::Master {
                if let Some(store) = self.store.upgrade() {
                    store.relinquish_role(&self.local, device_id).await?;
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mastership-role-sync"
    }

    fn is_relevant(&self, event: &MastershipEvent) -> bool {
        matches!(event, MastershipEvent::MasterChanged { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterMembership;
    use crate::config::EventConfig;
    use crate::store::MapOptions;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct RecordingApplier {
        refuse_master: bool,
        applied: mpsc::UnboundedSender<(DeviceId, MastershipRole)>,
    }

    #[async_trait]
    impl RoleApplier for RecordingApplier {
        async fn apply_role(
            &self,
            _node: &NodeId,
            device_id: &DeviceId,
            role: MastershipRole,
        ) -> SdnResult<()> {
            let _ = self.applied.send((device_id.clone(), role));
            if self.refuse_master && role == MastershipRole::Master {
                return Err(SdnError::southbound("set_role", device_id.as_str(), "refused"));
            }
            Ok(())
        }
    }

    async fn manager(local: &str, peers: &[&str]) -> Arc<MastershipManager> {
        let membership = Arc::new(ClusterMembership::new(
            NodeId::new(local),
            EventConfig::default(),
        ));
        for peer in peers {
            membership.add_node(NodeId::new(*peer)).await;
        }
        let store = MastershipStore::new(membership, MapOptions::in_memory()).unwrap();
        MastershipManager::new(NodeId::new(local), store, MastershipConfig::default())
    }

    #[tokio::test]
    async fn test_local_role_without_election() {
        let manager = manager("n1", &[]).await;
        let device = DeviceId::new("of:1");

        assert_eq!(manager.get_local_role(&device), MastershipRole::None);
        assert!(manager.get_master_for(&device).unwrap().is_none());

        assert_eq!(manager.request_role_for(&device).await.unwrap(), MastershipRole::Master);
        assert!(manager.is_local_master(&device));
        assert_eq!(
            manager.get_mastership_term(&device).unwrap(),
            Some(MastershipTerm::new(NodeId::new("n1"), 1))
        );

        manager.relinquish_mastership(&device).await.unwrap();
        assert!(!manager.is_local_master(&device));
        assert_eq!(manager.get_mastership(&device).unwrap().term, 2);
    }

    #[tokio::test]
    async fn test_request_with_timeout_falls_back_to_none() {
        let manager = manager("n1", &[]).await;
        manager.store().map().set_latency(Duration::from_secs(10));
        let device = DeviceId::new("of:1");

        tokio::time::pause();
        let role = manager.request_role_with_timeout(&device).await;
        assert_eq!(role, MastershipRole::None);
    }

    #[tokio::test]
    async fn test_suspended_store_reports_no_role() {
        let manager = manager("n1", &[]).await;
        let device = DeviceId::new("of:1");
        manager.request_role_for(&device).await.unwrap();

        manager.store().map().suspend().await;
        assert_eq!(manager.get_local_role(&device), MastershipRole::None);
        assert!(manager.request_role_for(&device).await.is_err());
    }

    #[tokio::test]
    async fn test_refused_master_role_is_relinquished() {
        let manager = manager("n1", &["n2"]).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager
            .set_role_applier(Arc::new(RecordingApplier {
                refuse_master: true,
                applied: tx,
            }))
            .await;
        let device = DeviceId::new("of:1");

        manager
            .set_role(&NodeId::new("n2"), &device, MastershipRole::Standby)
            .await
            .unwrap();
        manager.request_role_for(&device).await.unwrap();

        assert_eq!(rx.recv().await, Some((device.clone(), MastershipRole::Master)));
        assert_eq!(rx.recv().await, Some((device.clone(), MastershipRole::None)));
        assert_eq!(manager.get_master_for(&device).unwrap(), Some(NodeId::new("n2")));
        assert_eq!(manager.get_mastership(&device).unwrap().term, 2);
    }

    #[tokio::test]
    async fn test_cleared_applier_sees_no_more_roles() {
        let manager = manager("n1", &[]).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager
            .set_role_applier(Arc::new(RecordingApplier {
                refuse_master: false,
                applied: tx,
            }))
            .await;
        manager.clear_role_applier().await;

        manager.request_role_for(&DeviceId::new("of:1")).await.unwrap();
        // the applier was dropped together with its listener
        assert!(rx.recv().await.is_none());
    }
}
