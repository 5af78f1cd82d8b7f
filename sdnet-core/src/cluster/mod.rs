//! Controller cluster membership
//!
//! Tracks which controller nodes exist and which of them are currently
//! reachable. Mastership elections only consider active nodes.

use crate::config::EventConfig;
use crate::event::{EventListener, ListenerId, ListenerRegistry};
use crate::types::NodeId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerNode {
    pub id: NodeId,
    pub state: NodeState,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterEvent {
    NodeAdded(NodeId),
    NodeActivated(NodeId),
    NodeDeactivated(NodeId),
    NodeRemoved(NodeId),
}

impl ClusterEvent {
    pub fn node_id(&self) -> &NodeId {
        match self {
            ClusterEvent::NodeAdded(id)
            | ClusterEvent::NodeActivated(id)
            | ClusterEvent::NodeDeactivated(id)
            | ClusterEvent::NodeRemoved(id) => id,
        }
    }

    /// Whether the event means the node can no longer hold roles
    pub fn is_departure(&self) -> bool {
        matches!(
            self,
            ClusterEvent::NodeDeactivated(_) | ClusterEvent::NodeRemoved(_)
        )
    }
}

pub struct ClusterMembership {
    local: NodeId,
    nodes: RwLock<BTreeMap<NodeId, ControllerNode>>,
    listeners: ListenerRegistry<ClusterEvent>,
}

impl ClusterMembership {
    /// Create a membership view containing only the active local node
    pub fn new(local: NodeId, events: EventConfig) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            local.clone(),
            ControllerNode {
                id: local.clone(),
                state: NodeState::Active,
                last_updated: Utc::now(),
            },
        );
        Self {
            local,
            nodes: RwLock::new(nodes),
            listeners: ListenerRegistry::new("cluster", events),
        }
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local
    }

    /// Add a node in the active state; returns false if it was already known
    pub async fn add_node(&self, id: NodeId) -> bool {
        let inserted = {
            let mut nodes = self.nodes.write();
            if nodes.contains_key(&id) {
                false
            } else {
                nodes.insert(
                    id.clone(),
                    ControllerNode {
                        id: id.clone(),
                        state: NodeState::Active,
                        last_updated: Utc::now(),
                    },
                );
                true
            }
        };
        if inserted {
            info!("Controller node {} joined", id);
            self.listeners.post(ClusterEvent::NodeAdded(id)).await;
        }
        inserted
    }

    pub async fn activate(&self, id: &NodeId) -> bool {
        if self.transition(id, NodeState::Active) {
            info!("Controller node {} is active", id);
            self.listeners
                .post(ClusterEvent::NodeActivated(id.clone()))
                .await;
            true
        } else {
            false
        }
    }

    pub async fn deactivate(&self, id: &NodeId) -> bool {
        if self.transition(id, NodeState::Inactive) {
            info!("Controller node {} is inactive", id);
            self.listeners
                .post(ClusterEvent::NodeDeactivated(id.clone()))
                .await;
            true
        } else {
            false
        }
    }

    pub async fn remove_node(&self, id: &NodeId) -> bool {
        let removed = self.nodes.write().remove(id).is_some();
        if removed {
            info!("Controller node {} left the cluster", id);
            self.listeners
                .post(ClusterEvent::NodeRemoved(id.clone()))
                .await;
        }
        removed
    }

    fn transition(&self, id: &NodeId, state: NodeState) -> bool {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(id) {
            Some(node) if node.state != state => {
                node.state = state;
                node.last_updated = Utc::now();
                true
            }
            _ => false,
        }
    }

    pub fn nodes(&self) -> Vec<ControllerNode> {
        self.nodes.read().values().cloned().collect()
    }

    /// Active nodes in ascending id order
    pub fn active_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .read()
            .values()
            .filter(|n| n.state == NodeState::Active)
            .map(|n| n.id.clone())
            .collect()
    }

    /// Whether `id` is the lowest active node, the one that acts on
    /// cluster-wide cleanup
    pub fn is_coordinator(&self, id: &NodeId) -> bool {
        self.active_nodes().first() == Some(id)
    }

    pub fn is_active(&self, id: &NodeId) -> bool {
        self.nodes
            .read()
            .get(id)
            .map(|n| n.state == NodeState::Active)
            .unwrap_or(false)
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener<ClusterEvent>>) -> ListenerId {
        self.listeners.add_listener(listener)
    }

    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove_listener(id).await
    }
}
