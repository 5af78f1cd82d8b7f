//! Next-hop resolution against learned hosts

use super::types::{ResolvedRoute, Route, RouteSet};
use crate::device::NetworkEvent;
use crate::types::Host;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;

/// Host locations indexed by IP address
#[derive(Default)]
pub struct RouteResolver {
    hosts: RwLock<HashMap<IpAddr, Host>>,
}

impl RouteResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a host event; returns the addresses whose location changed
    pub fn apply(&self, event: &NetworkEvent) -> Vec<IpAddr> {
        let mut hosts = self.hosts.write();
        match event {
            NetworkEvent::HostAdded(host) | NetworkEvent::HostMoved { host, .. } => {
                // addresses the host no longer claims
                let mut changed: Vec<IpAddr> = hosts
                    .iter()
                    .filter(|(ip, known)| {
                        known.mac == host.mac && known.vlan == host.vlan && !host.has_ip(ip)
                    })
                    .map(|(ip, _)| *ip)
                    .collect();
                for ip in &changed {
                    hosts.remove(ip);
                }
                for ip in &host.ips {
                    if hosts.get(ip) != Some(host) {
                        hosts.insert(*ip, host.clone());
                        changed.push(*ip);
                    }
                }
                changed
            }
            NetworkEvent::HostRemoved(host) => host
                .ips
                .iter()
                .filter(|ip| {
                    let known = hosts.get(ip).map(|h| h.mac == host.mac).unwrap_or(false);
                    known && hosts.remove(ip).is_some()
                })
                .copied()
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn host_for(&self, ip: &IpAddr) -> Option<Host> {
        self.hosts.read().get(ip).cloned()
    }

    pub fn resolve(&self, route: &Route) -> Option<ResolvedRoute> {
        let hosts = self.hosts.read();
        let host = hosts.get(&route.next_hop)?;
        Some(ResolvedRoute {
            route: route.clone(),
            next_hop_mac: host.mac,
            next_hop_vlan: host.vlan,
            location: host.location.clone(),
        })
    }

    /// Resolvable routes of the set, best first
    pub fn resolve_set(&self, set: &RouteSet) -> Vec<ResolvedRoute> {
        let mut resolved: Vec<ResolvedRoute> =
            set.routes.iter().filter_map(|r| self.resolve(r)).collect();
        resolved.sort_by(|a, b| a.preference_key().cmp(&b.preference_key()).then(a.cmp(b)));
        resolved
    }
}
