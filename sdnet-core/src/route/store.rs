//! Route table backed by the consistent map
//!
//! Each prefix maps to the [`RouteSet`] of competing routes. A radix index
//! over the stored prefixes serves longest-prefix-match lookups; it is
//! reconciled with the map after every write.

use super::prefix_table::PrefixTable;
use super::types::{Route, RouteSet};
use crate::error::SdnResult;
use crate::store::{ConsistentMap, MapOptions};
use crate::types::NodeId;
use ipnet::IpNet;
use parking_lot::RwLock;
use std::net::IpAddr;
use tracing::debug;

const MAP_NAME: &str = "routes";

pub struct RouteStore {
    map: ConsistentMap<IpNet, RouteSet>,
    index: RwLock<PrefixTable<()>>,
}

impl RouteStore {
    pub fn new(options: MapOptions) -> SdnResult<Self> {
        let map = ConsistentMap::new(MAP_NAME, options)?;
        let mut index = PrefixTable::new();
        for prefix in map.keys()? {
            index.insert(prefix, ());
        }
        Ok(Self {
            map,
            index: RwLock::new(index),
        })
    }

    pub fn map(&self) -> &ConsistentMap<IpNet, RouteSet> {
        &self.map
    }

    fn sync_index(&self, prefix: &IpNet) -> SdnResult<()> {
        let mut index = self.index.write();
        if self.map.contains_key(prefix)? {
            index.insert(*prefix, ());
        } else {
            index.remove(prefix);
        }
        Ok(())
    }

    /// Add or replace a route; returns whether the stored set changed
    pub async fn update(&self, mut route: Route) -> SdnResult<bool> {
        route.prefix = route.prefix.trunc();
        let prefix = route.prefix;
        let update = self
            .map
            .compute(&prefix, |current| {
                let mut set = current.cloned().unwrap_or_else(|| RouteSet::new(prefix));
                set.upsert(route.clone());
                Ok(Some(set))
            })
            .await?;
        self.sync_index(&prefix)?;
        Ok(update.changed())
    }

    /// Remove the route of the same origin; an emptied prefix is deleted
    pub async fn withdraw(&self, route: &Route) -> SdnResult<bool> {
        let prefix = route.prefix.trunc();
        let update = self
            .map
            .compute(&prefix, |current| {
                let Some(current) = current else {
                    return Ok(None);
                };
                let mut set = current.clone();
                set.withdraw(route);
                Ok((!set.is_empty()).then_some(set))
            })
            .await?;
        self.sync_index(&prefix)?;
        Ok(update.changed())
    }

    /// Remove every route learned by `node`; returns the touched prefixes
    /// and the number of routes removed
    pub async fn withdraw_node(&self, node: &NodeId) -> SdnResult<(Vec<IpNet>, usize)> {
        let mut touched = Vec::new();
        let mut removed = 0;
        for (prefix, set) in self.map.entries()? {
            if !set.value.routes.iter().any(|r| r.source_node == *node) {
                continue;
            }
            let mut count = 0;
            self.map
                .compute(&prefix, |current| {
                    let Some(current) = current else {
                        count = 0;
                        return Ok(None);
                    };
                    let mut set = current.clone();
                    count = set.withdraw_node(node);
                    Ok((!set.is_empty()).then_some(set))
                })
                .await?;
            self.sync_index(&prefix)?;
            removed += count;
            touched.push(prefix);
        }
        debug!("Withdrew {} routes of {}", removed, node);
        Ok((touched, removed))
    }

    pub fn get(&self, prefix: &IpNet) -> SdnResult<Option<RouteSet>> {
        Ok(self.map.get(&prefix.trunc())?.map(|v| v.value))
    }

    /// Stored prefixes containing `addr`, most specific first
    pub fn matching(&self, addr: IpAddr) -> Vec<IpNet> {
        self.index
            .read()
            .matching(addr)
            .into_iter()
            .map(|(prefix, _)| prefix)
            .collect()
    }

    /// Prefixes with at least one route through `next_hop`
    pub fn prefixes_via(&self, next_hop: &IpAddr) -> SdnResult<Vec<IpNet>> {
        Ok(self
            .map
            .entries()?
            .into_iter()
            .filter(|(_, set)| set.value.routes.iter().any(|r| r.next_hop == *next_hop))
            .map(|(prefix, _)| prefix)
            .collect())
    }

    pub fn prefixes(&self) -> SdnResult<Vec<IpNet>> {
        self.map.keys()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
