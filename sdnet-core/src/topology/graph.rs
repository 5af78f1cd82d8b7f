//! Topology graph description and the device/link graph built from it

use crate::graph::{Graph, GraphEdge};
use crate::types::{DeviceId, Link};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A topology vertex is a device
pub type TopologyVertex = DeviceId;

/// A topology edge is a directed link between device ports
pub type TopologyEdge = Link;

pub type TopologyGraph = Graph<TopologyVertex, TopologyEdge>;

impl GraphEdge<DeviceId> for Link {
    fn src(&self) -> &DeviceId {
        &self.src.device_id
    }

    fn dst(&self) -> &DeviceId {
        &self.dst.device_id
    }
}

/// Input to the topology builder: vertex and edge sets plus the logical
/// time at which they were observed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDescription {
    pub timestamp: u64,
    pub devices: BTreeSet<DeviceId>,
    pub links: BTreeSet<Link>,
}

impl GraphDescription {
    pub fn new(
        timestamp: u64,
        devices: impl IntoIterator<Item = DeviceId>,
        links: impl IntoIterator<Item = Link>,
    ) -> Self {
        Self {
            timestamp,
            devices: devices.into_iter().collect(),
            links: links.into_iter().collect(),
        }
    }

    pub fn to_graph(&self) -> TopologyGraph {
        Graph::new(self.devices.iter().cloned(), self.links.iter().cloned())
    }
}
