//! Network and cluster identifiers shared by every subsystem

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Stable identifier of a network element (for example `of:0000000000000001`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a controller cluster member
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortNumber(pub u64);

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A port on a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectPoint {
    pub device_id: DeviceId,
    pub port: PortNumber,
}

impl ConnectPoint {
    pub fn new(device_id: impl Into<DeviceId>, port: u64) -> Self {
        Self {
            device_id: device_id.into(),
            port: PortNumber(port),
        }
    }
}

impl fmt::Display for ConnectPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkType {
    /// Directly connected infrastructure link
    Direct,
    /// Link traversing a non-controlled fabric
    Indirect,
    /// Link to a host or a device in a remote domain
    Edge,
    Tunnel,
    Optical,
    Virtual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkState {
    Active,
    Inactive,
}

/// Directed link between two connect points
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Link {
    pub src: ConnectPoint,
    pub dst: ConnectPoint,
    pub link_type: LinkType,
    pub state: LinkState,
}

impl Link {
    pub fn new(src: ConnectPoint, dst: ConnectPoint, link_type: LinkType, state: LinkState) -> Self {
        Self {
            src,
            dst,
            link_type,
            state,
        }
    }

    /// Active direct link, the common case in fixtures
    pub fn direct(src: ConnectPoint, dst: ConnectPoint) -> Self {
        Self::new(src, dst, LinkType::Direct, LinkState::Active)
    }

    pub fn key(&self) -> LinkKey {
        LinkKey {
            src: self.src.clone(),
            dst: self.dst.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == LinkState::Active
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// Identity of a link independent of its type and state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkKey {
    pub src: ConnectPoint,
    pub dst: ConnectPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// 802.1Q VLAN identifier; `VlanId::NONE` means untagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VlanId(pub u16);

impl VlanId {
    pub const NONE: VlanId = VlanId(0xffff);
}

/// End host learned by the host subsystem
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    pub mac: MacAddress,
    pub vlan: VlanId,
    pub ips: Vec<IpAddr>,
    pub location: ConnectPoint,
}

impl Host {
    pub fn has_ip(&self, ip: &IpAddr) -> bool {
        self.ips.contains(ip)
    }
}
