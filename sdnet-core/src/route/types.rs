//! Unicast route model

use crate::error::{SdnError, SdnResult};
use crate::types::{ConnectPoint, MacAddress, NodeId, VlanId};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Protocol or component that contributed a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RouteSource {
    Static,
    Ui,
    Dhcp,
    Fpm,
    Ospf,
    Bgp,
    Ripng,
    Unknown,
}

impl RouteSource {
    /// Lower is preferred when several sources offer the same prefix
    pub fn preference(&self) -> u8 {
        match self {
            RouteSource::Static => 1,
            RouteSource::Ui => 2,
            RouteSource::Dhcp => 10,
            RouteSource::Fpm => 20,
            RouteSource::Ospf => 110,
            RouteSource::Bgp => 170,
            RouteSource::Ripng => 120,
            RouteSource::Unknown => u8::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Route {
    pub prefix: IpNet,
    pub next_hop: IpAddr,
    pub source: RouteSource,
    /// Controller node that learned the route
    pub source_node: NodeId,
}

impl Route {
    /// Validated constructor; the prefix is truncated to its network address
    pub fn new(
        source: RouteSource,
        prefix: IpNet,
        next_hop: IpAddr,
        source_node: NodeId,
    ) -> SdnResult<Self> {
        if prefix.network().is_ipv4() != next_hop.is_ipv4() {
            return Err(SdnError::validation(
                "next_hop",
                format!("{} is not in the address family of {}", next_hop, prefix),
            ));
        }
        Ok(Self {
            prefix: prefix.trunc(),
            next_hop,
            source,
            source_node,
        })
    }

    /// Routes from the same source and node replace each other
    pub(crate) fn same_origin(&self, other: &Route) -> bool {
        self.source == other.source && self.source_node == other.source_node
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {} ({:?})", self.prefix, self.next_hop, self.source)
    }
}

/// A route whose next hop was located on the network
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResolvedRoute {
    pub route: Route,
    pub next_hop_mac: MacAddress,
    pub next_hop_vlan: VlanId,
    pub location: ConnectPoint,
}

impl ResolvedRoute {
    pub fn prefix(&self) -> IpNet {
        self.route.prefix
    }

    pub fn next_hop(&self) -> IpAddr {
        self.route.next_hop
    }

    /// Best-route order: lowest source preference, then lowest next hop
    pub(crate) fn preference_key(&self) -> (u8, IpAddr) {
        (self.route.source.preference(), self.route.next_hop)
    }
}

/// Every competing route for one prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSet {
    pub prefix: IpNet,
    pub routes: Vec<Route>,
}

impl RouteSet {
    pub fn new(prefix: IpNet) -> Self {
        Self {
            prefix,
            routes: Vec::new(),
        }
    }

    /// Add or replace the route of the same origin; returns whether the set changed
    pub fn upsert(&mut self, route: Route) -> bool {
        match self.routes.iter_mut().find(|r| r.same_origin(&route)) {
            Some(existing) if *existing == route => false,
            Some(existing) => {
                *existing = route;
                true
            }
            None => {
                self.routes.push(route);
                self.routes.sort();
                true
            }
        }
    }

    pub fn withdraw(&mut self, route: &Route) -> bool {
        let before = self.routes.len();
        self.routes.retain(|r| !r.same_origin(route));
        before != self.routes.len()
    }

    pub fn withdraw_node(&mut self, node: &NodeId) -> usize {
        let before = self.routes.len();
        self.routes.retain(|r| r.source_node != *node);
        before - self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteEvent {
    RouteAdded(ResolvedRoute),
    RouteUpdated {
        route: ResolvedRoute,
        previous: ResolvedRoute,
    },
    RouteRemoved(ResolvedRoute),
    /// The best route is unchanged but the resolved alternatives differ
    AlternativeRoutesChanged {
        prefix: IpNet,
        alternatives: Vec<ResolvedRoute>,
    },
}

impl RouteEvent {
    pub fn prefix(&self) -> IpNet {
        match self {
            RouteEvent::RouteAdded(route) | RouteEvent::RouteRemoved(route) => route.prefix(),
            RouteEvent::RouteUpdated { route, .. } => route.prefix(),
            RouteEvent::AlternativeRoutesChanged { prefix, .. } => *prefix,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RouteEvent::RouteAdded(_) => "route_added",
            RouteEvent::RouteUpdated { .. } => "route_updated",
            RouteEvent::RouteRemoved(_) => "route_removed",
            RouteEvent::AlternativeRoutesChanged { .. } => "alternatives_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_mismatch_rejected() {
        let result = Route::new(
            RouteSource::Static,
            "10.0.0.0/8".parse().unwrap(),
            "2001:db8::1".parse().unwrap(),
            NodeId::new("n1"),
        );
        assert!(matches!(result, Err(SdnError::Validation { .. })));
    }

    #[test]
    fn test_route_set_replaces_same_origin() {
        let prefix: IpNet = "10.0.0.0/8".parse().unwrap();
        let mut set = RouteSet::new(prefix);
        let a = Route::new(RouteSource::Bgp, prefix, "1.1.1.1".parse().unwrap(), NodeId::new("n1")).unwrap();
        let b = Route::new(RouteSource::Bgp, prefix, "2.2.2.2".parse().unwrap(), NodeId::new("n1")).unwrap();
        let c = Route::new(RouteSource::Static, prefix, "3.3.3.3".parse().unwrap(), NodeId::new("n1")).unwrap();

        assert!(set.upsert(a.clone()));
        assert!(!set.upsert(a));
        assert!(set.upsert(b.clone()));
        assert!(set.upsert(c));
        assert_eq!(set.routes.len(), 2);
        assert!(set.withdraw(&b));
        assert_eq!(set.withdraw_node(&NodeId::new("n1")), 1);
        assert!(set.is_empty());
    }
}
