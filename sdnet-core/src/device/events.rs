//! Inbound network events
//!
//! Produced by the southbound providers and consumed by the topology
//! manager and the route resolver.

use crate::types::{ConnectPoint, DeviceId, Host, Link, LinkKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkEvent {
    DeviceAdded(DeviceId),
    DeviceRemoved(DeviceId),
    DeviceAvailabilityChanged {
        device_id: DeviceId,
        available: bool,
    },
    PortAdded {
        point: ConnectPoint,
        enabled: bool,
    },
    PortUpdated {
        point: ConnectPoint,
        enabled: bool,
    },
    PortRemoved(ConnectPoint),
    LinkAdded(Link),
    LinkUpdated(Link),
    LinkRemoved(LinkKey),
    HostAdded(Host),
    HostMoved {
        host: Host,
        previous: ConnectPoint,
    },
    HostRemoved(Host),
}

impl NetworkEvent {
    /// Host carried by a host event
    pub fn host(&self) -> Option<&Host> {
        match self {
            NetworkEvent::HostAdded(host)
            | NetworkEvent::HostMoved { host, .. }
            | NetworkEvent::HostRemoved(host) => Some(host),
            _ => None,
        }
    }

    /// Whether the event can change the topology graph
    pub fn affects_topology(&self) -> bool {
        self.host().is_none()
    }
}
