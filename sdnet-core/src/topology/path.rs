//! Paths over the topology

use crate::graph::{DisjointPathPair, GraphPath, Weight};
use crate::types::{DeviceId, Link};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub links: Vec<Link>,
    pub cost: Weight,
}

impl Path {
    pub fn src(&self) -> Option<&DeviceId> {
        self.links.first().map(|l| &l.src.device_id)
    }

    pub fn dst(&self) -> Option<&DeviceId> {
        self.links.last().map(|l| &l.dst.device_id)
    }

    pub fn hop_count(&self) -> usize {
        self.links.len()
    }

    /// Devices traversed, source first
    pub fn devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self.src().cloned().into_iter().collect();
        devices.extend(self.links.iter().map(|l| l.dst.device_id.clone()));
        devices
    }

    pub fn shares_link_with(&self, other: &Path) -> bool {
        self.links
            .iter()
            .any(|l| other.links.iter().any(|o| o.key() == l.key()))
    }

    /// Total order used to report path sets deterministically
    pub(crate) fn canonical_cmp(&self, other: &Path) -> Ordering {
        self.cost
            .value()
            .total_cmp(&other.cost.value())
            .then_with(|| self.links.cmp(&other.links))
    }
}

impl From<GraphPath<DeviceId, Link>> for Path {
    fn from(path: GraphPath<DeviceId, Link>) -> Self {
        Self {
            links: path.edges,
            cost: path.cost,
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hops: Vec<String> = self.devices().iter().map(|d| d.to_string()).collect();
        write!(f, "{} (cost {})", hops.join(" -> "), self.cost)
    }
}

/// Primary path with an optional backup sharing no links or risk groups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisjointPath {
    pub primary: Path,
    pub backup: Option<Path>,
}

impl DisjointPath {
    pub fn has_backup(&self) -> bool {
        self.backup.is_some()
    }

    pub fn cost(&self) -> Weight {
        match &self.backup {
            Some(backup) => self.primary.cost + backup.cost,
            None => self.primary.cost,
        }
    }
}

impl From<DisjointPathPair<DeviceId, Link>> for DisjointPath {
    fn from(pair: DisjointPathPair<DeviceId, Link>) -> Self {
        Self {
            primary: pair.primary.into(),
            backup: pair.backup.map(Path::from),
        }
    }
}
