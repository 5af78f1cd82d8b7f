//! Shared fixtures for the integration tests

#![allow(dead_code)]

use sdnet_core::cluster::ClusterMembership;
use sdnet_core::config::EventConfig;
use sdnet_core::mastership::MastershipStore;
use sdnet_core::store::MapOptions;
use sdnet_core::types::{ConnectPoint, DeviceId, Host, Link, MacAddress, NodeId, VlanId};
use std::sync::Arc;

pub fn node(id: &str) -> NodeId {
    NodeId::new(id)
}

pub fn device(id: &str) -> DeviceId {
    DeviceId::new(id)
}

/// Membership with every listed node active, the first one local
pub async fn membership(nodes: &[&str]) -> Arc<ClusterMembership> {
    let membership = Arc::new(ClusterMembership::new(node(nodes[0]), EventConfig::default()));
    for id in &nodes[1..] {
        membership.add_node(node(id)).await;
    }
    membership
}

pub async fn term_store(nodes: &[&str]) -> (Arc<ClusterMembership>, Arc<MastershipStore>) {
    let membership = membership(nodes).await;
    let store = MastershipStore::new(membership.clone(), MapOptions::in_memory())
        .expect("in-memory store");
    (membership, store)
}

/// Link from `src` port `dst`-index to `dst` port `src`-index, so every
/// pair of devices uses a distinct port on each side
pub fn link(src: &str, dst: &str) -> Link {
    Link::direct(
        ConnectPoint::new(src, port_towards(dst)),
        ConnectPoint::new(dst, port_towards(src)),
    )
}

fn port_towards(device: &str) -> u64 {
    device.bytes().map(u64::from).sum()
}

pub fn bidirectional(pairs: &[(&str, &str)]) -> Vec<Link> {
    pairs
        .iter()
        .flat_map(|(a, b)| [link(a, b), link(b, a)])
        .collect()
}

pub fn host(ip: &str, device: &str, port: u64) -> Host {
    Host {
        mac: MacAddress([0x02, 0, 0, 0, 0, port as u8]),
        vlan: VlanId::NONE,
        ips: vec![ip.parse().expect("ip")],
        location: ConnectPoint::new(device, port),
    }
}
