//! Cleanup after controller nodes depart
//!
//! Departed nodes are queued and processed one at a time: every mastership
//! the node held is relinquished, cascading re-election to the next live
//! standby, and every route the node contributed is withdrawn. Every node
//! runs a reaper, but only the cluster coordinator reaps.
//!
//! Devices that leave the network are reaped too: their meters and meter
//! ids are purged regardless of mastership.

use crate::cluster::{ClusterEvent, ClusterMembership};
use crate::config::SdnConfig;
use crate::error::SdnResult;
use crate::event::{EventListener, ListenerId, ListenerRegistry};
use crate::mastership::MastershipStore;
use crate::meter::MeterStore;
use crate::metrics_otel;
use crate::patterns::{retry, RetryConfig};
use crate::route::RouteManager;
use crate::types::{DeviceId, NodeId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument};

/// What a reap of one node cleaned up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapReport {
    pub node: NodeId,
    /// Mastership changes caused by relinquishing the node's roles
    pub mastership_changes: usize,
    pub routes_withdrawn: usize,
}

pub struct NodeReaper {
    local: NodeId,
    mastership: Arc<MastershipStore>,
    routes: Arc<RouteManager>,
    membership: Arc<ClusterMembership>,
    meters: Mutex<Option<Arc<MeterStore>>>,
    retry: RetryConfig,
    queue_capacity: usize,
    listeners: ListenerRegistry<ReapReport>,
    departures: Mutex<Option<ListenerId>>,
}

impl NodeReaper {
    pub fn new(
        mastership: Arc<MastershipStore>,
        routes: Arc<RouteManager>,
        membership: Arc<ClusterMembership>,
        config: &SdnConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            local: config.local_node(),
            mastership,
            routes,
            membership,
            meters: Mutex::new(None),
            retry: RetryConfig::exponential(config.mastership.cas_attempts, config.mastership.cas_backoff)
                .with_operation_name("relinquish_all_roles"),
            queue_capacity: config.routes.reaper_queue_capacity,
            listeners: ListenerRegistry::new("reaper", config.events.clone()),
            departures: Mutex::new(None),
        })
    }

    /// Purge the meters of removed devices from `meters`
    pub fn with_meters(&self, meters: Arc<MeterStore>) {
        *self.meters.lock() = Some(meters);
    }

    /// Subscribe to reap reports
    pub fn add_listener(&self, listener: Arc<dyn EventListener<ReapReport>>) -> ListenerId {
        self.listeners.add_listener(listener)
    }

    /// Follow membership and reap departed nodes in the background
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let (sender, mut receiver) = mpsc::channel::<NodeId>(self.queue_capacity);
        let id = self
            .membership
            .add_listener(Arc::new(DepartureListener { queue: sender }));
        *self.departures.lock() = Some(id);

        let reaper = self.clone();
        tokio::spawn(async move {
            while let Some(node) = receiver.recv().await {
                if reaper.membership.is_active(&node) {
                    info!("Node {} came back before reaping, skipping", node);
                    continue;
                }
                if !reaper.membership.is_coordinator(&reaper.local) {
                    debug!("Leaving node {} to the coordinator", node);
                    continue;
                }
                match reaper.reap(&node).await {
                    Ok(report) => reaper.listeners.post(report).await,
                    Err(e) => error!("Failed to reap node {}: {}", node, e),
                }
            }
        })
    }

    /// Stop following membership; the worker ends once its queue drains
    pub async fn stop(&self) {
        let departures = self.departures.lock().take();
        if let Some(id) = departures {
            self.membership.remove_listener(id).await;
        }
    }

    /// Relinquish every role held by `node` and withdraw its routes
    #[instrument(skip(self))]
    pub async fn reap(&self, node: &NodeId) -> SdnResult<ReapReport> {
        let store = self.mastership.clone();
        let target = node.clone();
        let changes = retry(self.retry.clone(), move || {
            let store = store.clone();
            let target = target.clone();
            Box::pin(async move { store.relinquish_all_roles(&target).await })
        })
        .await?;

        let routes_withdrawn = self.routes.withdraw_by_node(node).await?;
        metrics_otel::record_reaper_run();

        let report = ReapReport {
            node: node.clone(),
            mastership_changes: changes.len(),
            routes_withdrawn,
        };
        info!(
            "Reaped node {}: {} mastership changes, {} routes withdrawn",
            node, report.mastership_changes, report.routes_withdrawn
        );
        Ok(report)
    }

    /// Forget everything stored for a device that left the network;
    /// returns how many meters were purged
    #[instrument(skip(self))]
    pub async fn reap_device(&self, device_id: &DeviceId) -> SdnResult<usize> {
        let meters = self.meters.lock().clone();
        let Some(meters) = meters else {
            return Ok(0);
        };
        let purged = meters.purge_meters(device_id).await?;
        metrics_otel::record_reaper_run();
        Ok(purged)
    }
}

struct DepartureListener {
    queue: mpsc::Sender<NodeId>,
}

#[async_trait]
impl EventListener<ClusterEvent> for DepartureListener {
    async fn on_event(&self, event: ClusterEvent) -> SdnResult<()> {
        // waits for room rather than dropping a departed node
        self.queue
            .send(event.node_id().clone())
            .await
            .map_err(|_| crate::error::SdnError::EventDelivery {
                listener: "node-reaper".to_string(),
                details: "reaper stopped".to_string(),
            })
    }

    fn name(&self) -> &str {
        "node-reaper"
    }

    fn is_relevant(&self, event: &ClusterEvent) -> bool {
        event.is_departure()
    }
}
