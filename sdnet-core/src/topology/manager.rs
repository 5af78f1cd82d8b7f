//! Device and link inventory feeding the snapshot builder
//!
//! The manager applies inbound network events to its inventory and, for
//! every batch that changes the graph, builds a fresh immutable
//! [`Topology`] and swaps it in. Readers holding an older snapshot keep a
//! consistent view until they drop it.

use super::engine::{PathEngine, SharedPathSearch};
use super::graph::GraphDescription;
use super::snapshot::Topology;
use super::weigher::SharedLinkWeigher;
use crate::config::{EventConfig, TopologyConfig};
use crate::device::NetworkEvent;
use crate::event::{EventListener, ListenerId, ListenerRegistry};
use crate::types::{ConnectPoint, DeviceId, Link, LinkKey, PortNumber};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// Published after each rebuild
#[derive(Debug, Clone)]
pub struct TopologyEvent {
    pub topology: Arc<Topology>,
    /// Events that caused the rebuild; empty when triggered by a settings change
    pub reasons: Vec<NetworkEvent>,
}

#[derive(Debug, Clone)]
struct DeviceRecord {
    available: bool,
    ports: BTreeMap<PortNumber, bool>,
}

impl DeviceRecord {
    fn available() -> Self {
        Self {
            available: true,
            ports: BTreeMap::new(),
        }
    }

    /// Ports never reported are assumed enabled
    fn port_enabled(&self, port: PortNumber) -> bool {
        self.ports.get(&port).copied().unwrap_or(true)
    }
}

#[derive(Debug, Default)]
struct Inventory {
    devices: BTreeMap<DeviceId, DeviceRecord>,
    links: BTreeMap<LinkKey, Link>,
}

impl Inventory {
    fn apply(&mut self, event: &NetworkEvent) -> bool {
        match event {
            NetworkEvent::DeviceAdded(id) => match self.devices.get_mut(id) {
                Some(record) if record.available => false,
                Some(record) => {
                    record.available = true;
                    true
                }
                None => {
                    self.devices.insert(id.clone(), DeviceRecord::available());
                    true
                }
            },
            NetworkEvent::DeviceRemoved(id) => {
                let existed = self.devices.remove(id).is_some();
                let before = self.links.len();
                self.links
                    .retain(|key, _| key.src.device_id != *id && key.dst.device_id != *id);
                existed || before != self.links.len()
            }
            NetworkEvent::DeviceAvailabilityChanged {
                device_id,
                available,
            } => {
                let record = self
                    .devices
                    .entry(device_id.clone())
                    .or_insert_with(|| DeviceRecord {
                        available: !*available,
                        ports: BTreeMap::new(),
                    });
                let changed = record.available != *available;
                record.available = *available;
                changed
            }
            NetworkEvent::PortAdded { point, enabled }
            | NetworkEvent::PortUpdated { point, enabled } => {
                match self.devices.get_mut(&point.device_id) {
                    Some(record) => record.ports.insert(point.port, *enabled) != Some(*enabled),
                    None => false,
                }
            }
            NetworkEvent::PortRemoved(point) => {
                let removed = self
                    .devices
                    .get_mut(&point.device_id)
                    .map(|record| record.ports.remove(&point.port).is_some())
                    .unwrap_or(false);
                let before = self.links.len();
                self.links
                    .retain(|key, _| key.src != *point && key.dst != *point);
                removed || before != self.links.len()
            }
            NetworkEvent::LinkAdded(link) | NetworkEvent::LinkUpdated(link) => {
                self.links.insert(link.key(), link.clone()).as_ref() != Some(link)
            }
            NetworkEvent::LinkRemoved(key) => self.links.remove(key).is_some(),
            NetworkEvent::HostAdded(_)
            | NetworkEvent::HostMoved { .. }
            | NetworkEvent::HostRemoved(_) => false,
        }
    }

    fn point_usable(&self, point: &ConnectPoint) -> bool {
        self.devices
            .get(&point.device_id)
            .map(|record| record.available && record.port_enabled(point.port))
            .unwrap_or(false)
    }

    fn describe(&self, timestamp: u64) -> GraphDescription {
        GraphDescription::new(
            timestamp,
            self.devices
                .iter()
                .filter(|(_, record)| record.available)
                .map(|(id, _)| id.clone()),
            self.links
                .values()
                .filter(|link| self.point_usable(&link.src) && self.point_usable(&link.dst))
                .cloned(),
        )
    }
}

pub struct TopologyManager {
    engine: Arc<PathEngine>,
    config: TopologyConfig,
    inventory: Mutex<Inventory>,
    current: RwLock<Arc<Topology>>,
    clock: AtomicU64,
    listeners: ListenerRegistry<TopologyEvent>,
}

impl TopologyManager {
    pub fn new(config: TopologyConfig, events: EventConfig) -> Self {
        let engine = Arc::new(PathEngine::new(&config));
        let empty = engine.build(&GraphDescription::default());
        Self {
            engine,
            config,
            inventory: Mutex::new(Inventory::default()),
            current: RwLock::new(empty),
            clock: AtomicU64::new(0),
            listeners: ListenerRegistry::new("topology", events),
        }
    }

    pub fn engine(&self) -> &Arc<PathEngine> {
        &self.engine
    }

    /// The most recent snapshot
    pub fn current_topology(&self) -> Arc<Topology> {
        self.current.read().clone()
    }

    /// Apply a batch of events, rebuilding once if any of them changed the graph
    #[instrument(skip(self, events), fields(batch = events.len()))]
    pub async fn submit(&self, events: Vec<NetworkEvent>) -> Option<Arc<Topology>> {
        let description = {
            let mut inventory = self.inventory.lock();
            let mut changed = false;
            for event in &events {
                changed |= inventory.apply(event);
            }
            if !changed {
                debug!("Batch of {} events left the topology unchanged", events.len());
                return None;
            }
            inventory.describe(self.clock.fetch_add(1, Ordering::SeqCst) + 1)
        };

        Some(self.install(&description, events).await)
    }

    async fn install(&self, description: &GraphDescription, reasons: Vec<NetworkEvent>) -> Arc<Topology> {
        let topology = self.engine.build(description);
        let installed = {
            let mut current = self.current.write();
            // an older build finishing late must not replace a newer snapshot
            let newer = current.timestamp() < topology.timestamp();
            if newer {
                *current = topology.clone();
            }
            newer
        };
        if !installed {
            debug!(
                "Discarding topology {} superseded by {}",
                topology.timestamp(),
                self.current.read().timestamp()
            );
            return topology;
        }
        self.listeners
            .post(TopologyEvent {
                topology: topology.clone(),
                reasons,
            })
            .await;
        topology
    }

    async fn rebuild(&self) -> Arc<Topology> {
        let description = self
            .inventory
            .lock()
            .describe(self.clock.fetch_add(1, Ordering::SeqCst) + 1);
        self.install(&description, Vec::new()).await
    }

    /// Replace the default weigher and rebuild the current snapshot
    pub async fn set_default_link_weigher(&self, weigher: Option<SharedLinkWeigher>) -> Arc<Topology> {
        self.engine.set_default_link_weigher(weigher);
        self.rebuild().await
    }

    /// Replace the default search algorithm and rebuild the current snapshot
    pub async fn set_default_path_search(&self, search: Option<SharedPathSearch>) -> Arc<Topology> {
        self.engine.set_default_path_search(search);
        self.rebuild().await
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener<TopologyEvent>>) -> ListenerId {
        self.listeners.add_listener(listener)
    }

    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove_listener(id).await
    }

    /// Spawn the event loop. Events are drained in batches of at most
    /// `max_event_batch`; dropping the returned sender stops the loop.
    pub fn start(self: &Arc<Self>) -> (mpsc::Sender<NetworkEvent>, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel(self.config.event_queue_capacity);
        let manager = self.clone();

        let handle = tokio::spawn(async move {
            info!("Topology event loop started");
            while let Some(first) = receiver.recv().await {
                let mut batch = vec![first];
                while batch.len() < manager.config.max_event_batch {
                    match receiver.try_recv() {
                        Ok(event) => batch.push(event),
                        Err(_) => break,
                    }
                }
                manager.submit(batch).await;
            }
            info!("Topology event loop stopped");
        });

        (sender, handle)
    }
}
