//! One controller node with every subsystem wired together
//!
//! [`SdnController::start`] builds a standalone node from an
//! [`SdnConfig`]. [`SdnController::join`] builds another node sharing the
//! replicated state (membership, mastership terms, routes, flow rules and
//! meters) of an existing one, which is how an in-process cluster is
//! assembled.

use crate::cluster::ClusterMembership;
use crate::config::SdnConfig;
use crate::device::{DriverRegistry, DriverRoleApplier, NetworkEvent};
use crate::error::{SdnError, SdnResult};
use crate::event::ListenerId;
use crate::flow::{FlowRule, FlowRuleId, FlowRuleStore};
use crate::mastership::{MastershipManager, MastershipStore, RoleBalancer};
use crate::meter::{Meter, MeterId, MeterIdPool, MeterStore};
use crate::reaper::NodeReaper;
use crate::route::{RouteManager, RouteProgrammer};
use crate::store::{ConsistentMap, DeviceFencedMap, MapOptions, MapPersistence};
use crate::topology::{Topology, TopologyManager};
use crate::types::{DeviceId, NodeId};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

/// Replicated state shared by every node of a cluster
#[derive(Clone)]
struct SharedState {
    membership: Arc<ClusterMembership>,
    mastership: Arc<MastershipStore>,
    routes: Arc<RouteManager>,
    flow_rules: Option<Arc<DeviceFencedMap<FlowRuleId, FlowRule>>>,
    meters: Option<Arc<DeviceFencedMap<MeterId, Meter>>>,
    meter_ids: Option<Arc<ConsistentMap<DeviceId, MeterIdPool>>>,
}

pub struct SdnController {
    config: SdnConfig,
    local: NodeId,
    shared: SharedState,
    mastership: Arc<MastershipManager>,
    balancer: Arc<RoleBalancer>,
    topology: Arc<TopologyManager>,
    flows: Arc<FlowRuleStore>,
    meters: Arc<MeterStore>,
    drivers: Arc<DriverRegistry>,
    reaper: Arc<NodeReaper>,
    route_programmer: Mutex<Option<ListenerId>>,
    network_events: mpsc::Sender<NetworkEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SdnController {
    /// Start a standalone node, reloading persisted state when storage is configured
    #[instrument(skip(config), fields(node = %config.node_id))]
    pub async fn start(config: SdnConfig) -> SdnResult<Arc<Self>> {
        config.validate()?;
        let persistence = MapPersistence::from_config(&config.storage)?;
        let options = MapOptions::from_config(&config, persistence);

        let membership = Arc::new(ClusterMembership::new(
            config.local_node(),
            config.events.clone(),
        ));
        let shared = SharedState {
            mastership: MastershipStore::new(membership.clone(), options.clone())?,
            routes: RouteManager::new(options.clone())?,
            membership,
            flow_rules: None,
            meters: None,
            meter_ids: None,
        };
        let controller = Self::assemble(config, shared, options).await?;
        controller.shared.routes.resync().await?;
        Ok(controller)
    }

    /// Start a node that shares `peer`'s replicated state
    #[instrument(skip(config, peer), fields(node = %config.node_id))]
    pub async fn join(config: SdnConfig, peer: &SdnController) -> SdnResult<Arc<Self>> {
        config.validate()?;
        let local = config.local_node();
        if !peer.shared.membership.add_node(local.clone()).await {
            peer.shared.membership.activate(&local).await;
        }
        let options = MapOptions::from_config(&config, None);
        let mut shared = peer.shared.clone();
        shared.flow_rules = Some(peer.flows.rules().clone());
        shared.meters = Some(peer.meters.meters().clone());
        shared.meter_ids = Some(peer.meters.id_pools().clone());
        Self::assemble(config, shared, options).await
    }

    async fn assemble(config: SdnConfig, shared: SharedState, options: MapOptions) -> SdnResult<Arc<Self>> {
        let local = config.local_node();
        let drivers = Arc::new(DriverRegistry::new());

        let mastership = MastershipManager::new(
            local.clone(),
            shared.mastership.clone(),
            config.mastership.clone(),
        );
        mastership
            .set_role_applier(Arc::new(DriverRoleApplier::new(drivers.clone())))
            .await;

        let balancer = RoleBalancer::new(
            shared.mastership.clone(),
            shared.membership.clone(),
            config.mastership.clone(),
        );
        balancer.start(local.clone()).await;

        let topology = Arc::new(TopologyManager::new(
            config.topology.clone(),
            config.events.clone(),
        ));
        let (network_events, topology_task) = topology.start();

        let flows = match &shared.flow_rules {
            Some(rules) => FlowRuleStore::with_rules(mastership.clone(), rules.clone(), Some(drivers.clone())),
            None => FlowRuleStore::new(mastership.clone(), options.clone(), Some(drivers.clone()))?,
        };
        let max_meters = config.meters.max_meters_per_device;
        let meters = match (&shared.meters, &shared.meter_ids) {
            (Some(table), Some(ids)) => {
                MeterStore::with_tables(mastership.clone(), table.clone(), ids.clone(), max_meters)
            }
            _ => MeterStore::new(mastership.clone(), options, max_meters)?,
        };
        let route_programmer = config
            .routes
            .program_routes
            .then(|| shared.routes.add_listener(RouteProgrammer::new(flows.clone())));

        let reaper = NodeReaper::new(
            shared.mastership.clone(),
            shared.routes.clone(),
            shared.membership.clone(),
            &config,
        );
        reaper.with_meters(meters.clone());
        let reaper_task = reaper.start();

        info!("Controller node {} started", local);
        Ok(Arc::new(Self {
            config,
            local,
            shared,
            mastership,
            balancer,
            topology,
            flows,
            meters,
            drivers,
            reaper,
            route_programmer: Mutex::new(route_programmer),
            network_events,
            tasks: Mutex::new(vec![topology_task, reaper_task]),
        }))
    }

    pub fn config(&self) -> &SdnConfig {
        &self.config
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local
    }

    pub fn membership(&self) -> &Arc<ClusterMembership> {
        &self.shared.membership
    }

    pub fn mastership(&self) -> &Arc<MastershipManager> {
        &self.mastership
    }

    pub fn balancer(&self) -> &Arc<RoleBalancer> {
        &self.balancer
    }

    pub fn topology(&self) -> &Arc<TopologyManager> {
        &self.topology
    }

    pub fn current_topology(&self) -> Arc<Topology> {
        self.topology.current_topology()
    }

    pub fn routes(&self) -> &Arc<RouteManager> {
        &self.shared.routes
    }

    pub fn flows(&self) -> &Arc<FlowRuleStore> {
        &self.flows
    }

    pub fn meters(&self) -> &Arc<MeterStore> {
        &self.meters
    }

    pub fn drivers(&self) -> &Arc<DriverRegistry> {
        &self.drivers
    }

    pub fn reaper(&self) -> &Arc<NodeReaper> {
        &self.reaper
    }

    /// Apply a batch of network events: host events re-resolve routes,
    /// everything else rebuilds the topology before this returns. Removed
    /// devices are reaped once the topology no longer holds them.
    pub async fn submit(&self, events: Vec<NetworkEvent>) -> SdnResult<()> {
        let (hosts, graph): (Vec<NetworkEvent>, Vec<NetworkEvent>) =
            events.into_iter().partition(|e| e.host().is_some());
        for event in &hosts {
            self.shared.routes.handle_host_event(event).await?;
        }
        let removed: Vec<DeviceId> = graph.iter().filter_map(removed_device).collect();
        if !graph.is_empty() {
            self.topology.submit(graph).await;
        }
        for device_id in &removed {
            self.reaper.reap_device(device_id).await?;
        }
        Ok(())
    }

    /// Queue a network event for the batching topology loop
    pub async fn post(&self, event: NetworkEvent) -> SdnResult<()> {
        if event.host().is_some() {
            return self.shared.routes.handle_host_event(&event).await;
        }
        if let Some(device_id) = removed_device(&event) {
            self.reaper.reap_device(&device_id).await?;
        }
        self.network_events
            .send(event)
            .await
            .map_err(|_| SdnError::EventDelivery {
                listener: "topology".to_string(),
                details: "topology loop stopped".to_string(),
            })
    }

    /// Detach from the shared state, give up every local role, leave the
    /// cluster and stop background tasks
    #[instrument(skip(self), fields(node = %self.local))]
    pub async fn shutdown(&self) -> SdnResult<()> {
        self.mastership.clear_role_applier().await;
        self.balancer.stop().await;
        let route_programmer = self.route_programmer.lock().take();
        if let Some(id) = route_programmer {
            self.shared.routes.remove_listener(id).await;
        }
        self.flows.stop().await;
        self.meters.stop().await;
        self.reaper.stop().await;

        let events = self.shared.mastership.relinquish_all_roles(&self.local).await?;
        self.shared.membership.deactivate(&self.local).await;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!(
            "Controller node {} stopped after {} mastership handovers",
            self.local,
            events.len()
        );
        Ok(())
    }
}

fn removed_device(event: &NetworkEvent) -> Option<DeviceId> {
    match event {
        NetworkEvent::DeviceRemoved(device_id) => Some(device_id.clone()),
        _ => None,
    }
}
