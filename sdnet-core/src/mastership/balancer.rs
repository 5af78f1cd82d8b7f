//! Mastership balancing across live controller nodes
//!
//! A balancing pass first re-elects devices whose master is gone, then
//! greedily moves masterships from the most loaded live node to the least
//! loaded one until no two live nodes differ by more than one device or no
//! further move is possible. Only standbys of a device can receive it.
//!
//! Ties are broken deterministically: among equally loaded nodes the
//! smallest node id is picked as both donor and receiver, and the donor's
//! devices are tried in ascending device id order.

use super::store::MastershipStore;
use crate::cluster::{ClusterEvent, ClusterMembership};
use crate::config::MastershipConfig;
use crate::error::SdnResult;
use crate::event::{EventListener, ListenerId};
use crate::metrics_otel;
use crate::types::{DeviceId, NodeId};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// One mastership handover decided by the balancer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMove {
    pub device_id: DeviceId,
    pub from: Option<NodeId>,
    pub to: NodeId,
}

/// Outcome of a balancing pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceReport {
    /// Re-elections followed by load moves, in execution order
    pub moves: Vec<RoleMove>,
    /// Devices left without a master, retried on the next membership event
    pub unassigned: Vec<DeviceId>,
    /// Mastered device count per live node after the pass
    pub load: BTreeMap<NodeId, usize>,
}

impl BalanceReport {
    /// Largest difference in mastered devices between two live nodes
    pub fn spread(&self) -> usize {
        let max = self.load.values().max().copied().unwrap_or(0);
        let min = self.load.values().min().copied().unwrap_or(0);
        max - min
    }
}

pub struct RoleBalancer {
    store: Arc<MastershipStore>,
    membership: Arc<ClusterMembership>,
    config: MastershipConfig,
    pending: Mutex<BTreeSet<DeviceId>>,
    trigger: Mutex<Option<ListenerId>>,
}

impl RoleBalancer {
    pub fn new(
        store: Arc<MastershipStore>,
        membership: Arc<ClusterMembership>,
        config: MastershipConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            membership,
            config,
            pending: Mutex::new(BTreeSet::new()),
            trigger: Mutex::new(None),
        })
    }

    /// Subscribe to membership changes: devices marked pending are retried
    /// on every event, and a full pass runs when auto-balance is enabled.
    /// Only the coordinator node reacts, so one pass runs per event.
    pub async fn start(self: &Arc<Self>, local: NodeId) {
        let id = self.membership.add_listener(Arc::new(MembershipTrigger {
            balancer: self.clone(),
            local,
        }));
        let previous = self.trigger.lock().replace(id);
        if let Some(previous) = previous {
            self.membership.remove_listener(previous).await;
        }
    }

    /// Stop reacting to membership changes
    pub async fn stop(&self) {
        let trigger = self.trigger.lock().take();
        if let Some(id) = trigger {
            self.membership.remove_listener(id).await;
        }
    }

    /// Devices waiting for a live candidate
    pub fn pending(&self) -> Vec<DeviceId> {
        self.pending.lock().iter().cloned().collect()
    }

    /// Re-elect only the devices marked for retry
    pub async fn retry_pending(&self) -> SdnResult<Vec<RoleMove>> {
        let devices = self.pending();
        let mut moves = Vec::new();
        for device_id in devices {
            if let Some(mv) = self.reelect(&device_id).await? {
                moves.push(mv);
            }
        }
        Ok(moves)
    }

    async fn reelect(&self, device_id: &DeviceId) -> SdnResult<Option<RoleMove>> {
        let from = self.store.get_master(device_id)?;
        self.store.reelect(device_id).await?;
        let to = self.store.get_master(device_id)?;

        match to {
            Some(to) => {
                self.pending.lock().remove(device_id);
                if from.as_ref() == Some(&to) {
                    return Ok(None);
                }
                Ok(Some(RoleMove {
                    device_id: device_id.clone(),
                    from,
                    to,
                }))
            }
            None => {
                debug!("No live candidate for {}, will retry", device_id);
                self.pending.lock().insert(device_id.clone());
                Ok(None)
            }
        }
    }

    /// Rebalance masterships over the live nodes
    #[instrument(skip(self))]
    pub async fn balance_roles(&self) -> SdnResult<BalanceReport> {
        let live: BTreeSet<NodeId> = self.membership.active_nodes().into_iter().collect();
        let mut report = BalanceReport::default();

        for device_id in self.store.devices()? {
            let master_live = self
                .store
                .get_master(&device_id)?
                .map(|m| live.contains(&m))
                .unwrap_or(false);
            if !master_live {
                if let Some(mv) = self.reelect(&device_id).await? {
                    report.moves.push(mv);
                }
            }
        }

        let mut mastered: BTreeMap<NodeId, BTreeSet<DeviceId>> =
            live.iter().map(|n| (n.clone(), BTreeSet::new())).collect();
        for device_id in self.store.devices()? {
            if let Some(master) = self.store.get_master(&device_id)? {
                if let Some(devices) = mastered.get_mut(&master) {
                    devices.insert(device_id);
                }
            }
        }

        // every move strictly lowers the sum of squared loads
        let budget = self.store.devices()?.len();
        for _ in 0..budget {
            let Some(mv) = self.next_move(&mastered)? else {
                break;
            };
            self.store.set_master(&mv.to, &mv.device_id).await?;
            if let Some(from) = &mv.from {
                if let Some(devices) = mastered.get_mut(from) {
                    devices.remove(&mv.device_id);
                }
            }
            if let Some(devices) = mastered.get_mut(&mv.to) {
                devices.insert(mv.device_id.clone());
            }
            debug!("Moved {} from {:?} to {}", mv.device_id, mv.from, mv.to);
            report.moves.push(mv);
        }

        report.unassigned = self.pending();
        report.load = mastered.iter().map(|(n, d)| (n.clone(), d.len())).collect();
        metrics_otel::record_balancer_moves(report.moves.len());
        info!(
            "Balanced roles: {} moves, spread {}, {} unassigned",
            report.moves.len(),
            report.spread(),
            report.unassigned.len()
        );
        Ok(report)
    }

    /// Pick the next handover from a node with more load to a standby with
    /// at least two fewer devices
    fn next_move(&self, mastered: &BTreeMap<NodeId, BTreeSet<DeviceId>>) -> SdnResult<Option<RoleMove>> {
        // donors: most loaded first, smallest id among equals
        let mut donors: Vec<(&NodeId, &BTreeSet<DeviceId>)> = mastered.iter().collect();
        donors.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.0.cmp(b.0)));
        // receivers: least loaded first, smallest id among equals
        let mut receivers: Vec<(&NodeId, usize)> =
            mastered.iter().map(|(n, d)| (n, d.len())).collect();
        receivers.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(b.0)));

        for (donor, devices) in &donors {
            for (receiver, load) in &receivers {
                if devices.len() <= load + 1 {
                    break;
                }
                for device_id in devices.iter() {
                    let nodes = self.store.get_nodes(device_id)?;
                    if nodes.iter().skip(1).any(|n| n == *receiver) {
                        return Ok(Some(RoleMove {
                            device_id: device_id.clone(),
                            from: Some((*donor).clone()),
                            to: (*receiver).clone(),
                        }));
                    }
                }
            }
        }
        Ok(None)
    }
}

struct MembershipTrigger {
    balancer: Arc<RoleBalancer>,
    local: NodeId,
}

#[async_trait]
impl EventListener<ClusterEvent> for MembershipTrigger {
    async fn on_event(&self, event: ClusterEvent) -> SdnResult<()> {
        if !self.balancer.membership.is_coordinator(&self.local) {
            debug!("{} is not the coordinator, leaving {:?} to it", self.local, event);
            return Ok(());
        }
        debug!("Membership changed ({:?}), checking mastership", event);
        if self.balancer.config.auto_balance {
            if let Err(e) = self.balancer.balance_roles().await {
                warn!("Balancing after {:?} failed: {}", event, e);
                return Err(e);
            }
        } else {
            let moves = self.balancer.retry_pending().await?;
            if !moves.is_empty() {
                info!("Re-elected {} pending devices", moves.len());
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "role-balancer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventConfig;
    use crate::store::MapOptions;

    fn n(id: &str) -> NodeId {
        NodeId::new(id)
    }

    async fn setup(nodes: &[&str]) -> (Arc<ClusterMembership>, Arc<MastershipStore>) {
        let membership = Arc::new(ClusterMembership::new(n(nodes[0]), EventConfig::default()));
        for node in &nodes[1..] {
            membership.add_node(n(node)).await;
        }
        let store = MastershipStore::new(membership.clone(), MapOptions::in_memory()).unwrap();
        (membership, store)
    }

    #[tokio::test]
    async fn test_balance_spreads_masterships() {
        let (membership, store) = setup(&["n1", "n2", "n3"]).await;
        for i in 0..6 {
            let device = DeviceId::new(format!("of:{}", i));
            for node in ["n1", "n2", "n3"] {
                store.request_role(&n(node), &device).await.unwrap();
            }
        }
        assert_eq!(store.get_devices(&n("n1")).unwrap().len(), 6);

        let balancer = RoleBalancer::new(store.clone(), membership, MastershipConfig::default());
        let report = balancer.balance_roles().await.unwrap();

        assert_eq!(report.moves.len(), 4);
        assert_eq!(report.spread(), 0);
        for node in ["n1", "n2", "n3"] {
            assert_eq!(store.get_devices(&n(node)).unwrap().len(), 2);
        }

        let again = balancer.balance_roles().await.unwrap();
        assert!(again.moves.is_empty());
    }

    #[tokio::test]
    async fn test_balance_reelects_from_inactive_master() {
        let (membership, store) = setup(&["n1", "n2"]).await;
        let device = DeviceId::new("of:1");
        store.request_role(&n("n2"), &device).await.unwrap();
        store.request_role(&n("n1"), &device).await.unwrap();
        membership.deactivate(&n("n2")).await;

        let balancer = RoleBalancer::new(store.clone(), membership, MastershipConfig::default());
        let report = balancer.balance_roles().await.unwrap();

        assert_eq!(
            report.moves,
            vec![RoleMove {
                device_id: device.clone(),
                from: Some(n("n2")),
                to: n("n1"),
            }]
        );
        assert_eq!(store.get_master(&device).unwrap(), Some(n("n1")));
    }

    #[tokio::test]
    async fn test_device_without_live_candidate_is_pending() {
        let (membership, store) = setup(&["n1", "n2"]).await;
        let device = DeviceId::new("of:1");
        store.request_role(&n("n2"), &device).await.unwrap();
        membership.deactivate(&n("n2")).await;

        let balancer = RoleBalancer::new(store.clone(), membership.clone(), MastershipConfig::default());
        let report = balancer.balance_roles().await.unwrap();
        assert_eq!(report.unassigned, vec![device.clone()]);
        assert_eq!(store.get_master(&device).unwrap(), None);

        membership.activate(&n("n2")).await;
        let moves = balancer.retry_pending().await.unwrap();
        assert_eq!(moves.len(), 1);
        assert_eq!(store.get_master(&device).unwrap(), Some(n("n2")));
        assert!(balancer.pending().is_empty());
    }

    #[tokio::test]
    async fn test_only_coordinator_reacts_to_departures() {
        let (membership, store) = setup(&["n1", "n2", "n3"]).await;
        let device = DeviceId::new("of:1");
        store.request_role(&n("n3"), &device).await.unwrap();
        membership.deactivate(&n("n3")).await;

        let config = MastershipConfig {
            auto_balance: true,
            ..MastershipConfig::default()
        };
        let departure = ClusterEvent::NodeDeactivated(n("n3"));
        let mut pending = Vec::new();
        for local in ["n1", "n2"] {
            let balancer = RoleBalancer::new(store.clone(), membership.clone(), config.clone());
            let trigger = MembershipTrigger {
                balancer: balancer.clone(),
                local: n(local),
            };
            trigger.on_event(departure.clone()).await.unwrap();
            pending.push(balancer.pending());
        }

        assert_eq!(pending, vec![vec![device], Vec::new()]);
    }
}
