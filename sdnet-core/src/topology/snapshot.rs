//! Immutable topology snapshot
//!
//! A [`Topology`] is built once from a [`GraphDescription`] and never
//! changes afterwards. Derived data (clusters, broadcast trees,
//! infrastructure points) is computed on first use and memoized for the
//! lifetime of the snapshot; default-weight path queries are cached.

use super::cluster::{ClusterId, TopologyCluster};
use super::engine::PathSettings;
use super::graph::{GraphDescription, TopologyGraph};
use super::path::{DisjointPath, Path};
use super::weigher::{HopCountLinkWeigher, NoIndirectLinksWeigher, SharedLinkWeigher};
use crate::graph::{
    disjoint_paths, k_shortest_paths, srlg_disjoint_paths, strongly_connected_components,
    DijkstraSearch, EdgeWeigher, GraphPathSearch, RiskProfile, ALL_PATHS,
};
use crate::metrics_otel;
use crate::types::{ConnectPoint, DeviceId, Link, LinkType};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Default)]
struct ClusterIndex {
    clusters: BTreeMap<ClusterId, TopologyCluster>,
    by_device: HashMap<DeviceId, ClusterId>,
    devices: HashMap<ClusterId, BTreeSet<DeviceId>>,
    links: HashMap<ClusterId, BTreeSet<Link>>,
}

pub struct Topology {
    timestamp: u64,
    creation_time: DateTime<Utc>,
    compute_cost: Duration,
    graph: TopologyGraph,
    settings: PathSettings,
    default_weigher: SharedLinkWeigher,
    clusters: OnceCell<ClusterIndex>,
    broadcast_sets: OnceCell<HashMap<ClusterId, BTreeSet<ConnectPoint>>>,
    infrastructure_points: OnceCell<HashSet<ConnectPoint>>,
    path_cache: DashMap<(DeviceId, DeviceId), Arc<Vec<Path>>>,
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topology")
            .field("timestamp", &self.timestamp)
            .field("devices", &self.graph.vertex_count())
            .field("links", &self.graph.edge_count())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Topology {
    /// Build a snapshot. The description is only read; clusters are
    /// computed eagerly, everything else on demand.
    pub fn build(description: &GraphDescription, settings: PathSettings) -> Self {
        let started = Instant::now();
        let graph = description.to_graph();
        let default_weigher = settings.weigher.clone().unwrap_or_else(|| {
            Arc::new(HopCountLinkWeigher::new(graph.vertex_count())) as SharedLinkWeigher
        });

        let mut topology = Self {
            timestamp: description.timestamp,
            creation_time: Utc::now(),
            compute_cost: Duration::ZERO,
            graph,
            settings,
            default_weigher,
            clusters: OnceCell::new(),
            broadcast_sets: OnceCell::new(),
            infrastructure_points: OnceCell::new(),
            path_cache: DashMap::new(),
        };
        topology.cluster_index();
        topology.compute_cost = started.elapsed();

        metrics_otel::record_topology_build(topology.compute_cost.as_secs_f64());
        debug!(
            "Built topology {} with {} devices, {} links, {} clusters in {:?}",
            topology.timestamp,
            topology.device_count(),
            topology.link_count(),
            topology.cluster_count(),
            topology.compute_cost
        );
        topology
    }

    /// Logical time of the description this snapshot was built from
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    /// Time spent building the graph and its clusters
    pub fn compute_cost(&self) -> Duration {
        self.compute_cost
    }

    pub fn graph(&self) -> &TopologyGraph {
        &self.graph
    }

    pub fn device_count(&self) -> usize {
        self.graph.vertex_count()
    }

    pub fn link_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains_device(&self, device_id: &DeviceId) -> bool {
        self.graph.contains_vertex(device_id)
    }

    // Clusters

    fn cluster_index(&self) -> &ClusterIndex {
        self.clusters.get_or_init(|| {
            let scc = strongly_connected_components(&self.graph, &NoIndirectLinksWeigher);
            let mut index = ClusterIndex::default();

            for (i, (devices, links)) in scc
                .clusters
                .into_iter()
                .zip(scc.cluster_edges)
                .enumerate()
            {
                let id = ClusterId(i as u32);
                let Some(root) = devices.iter().min().cloned() else {
                    continue;
                };
                index.clusters.insert(
                    id,
                    TopologyCluster {
                        id,
                        root,
                        device_count: devices.len(),
                        link_count: links.len(),
                    },
                );
                for device in &devices {
                    index.by_device.insert(device.clone(), id);
                }
                index.devices.insert(id, devices.into_iter().collect());
                index.links.insert(id, links.into_iter().collect());
            }
            index
        })
    }

    pub fn cluster_count(&self) -> usize {
        self.cluster_index().clusters.len()
    }

    pub fn clusters(&self) -> Vec<TopologyCluster> {
        self.cluster_index().clusters.values().cloned().collect()
    }

    pub fn cluster(&self, id: ClusterId) -> Option<TopologyCluster> {
        self.cluster_index().clusters.get(&id).cloned()
    }

    pub fn cluster_for_device(&self, device_id: &DeviceId) -> Option<TopologyCluster> {
        let index = self.cluster_index();
        index
            .by_device
            .get(device_id)
            .and_then(|id| index.clusters.get(id))
            .cloned()
    }

    pub fn cluster_devices(&self, id: ClusterId) -> BTreeSet<DeviceId> {
        self.cluster_index()
            .devices
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn cluster_links(&self, id: ClusterId) -> BTreeSet<Link> {
        self.cluster_index()
            .links
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    // Infrastructure and broadcast points

    fn infrastructure(&self) -> &HashSet<ConnectPoint> {
        self.infrastructure_points.get_or_init(|| {
            self.graph
                .edges()
                .iter()
                .filter(|link| link.link_type != LinkType::Edge)
                .flat_map(|link| [link.src.clone(), link.dst.clone()])
                .collect()
        })
    }

    /// Whether the point terminates a non-edge link
    pub fn is_infrastructure(&self, point: &ConnectPoint) -> bool {
        self.infrastructure().contains(point)
    }

    pub fn infrastructure_points(&self) -> BTreeSet<ConnectPoint> {
        self.infrastructure().iter().cloned().collect()
    }

    fn broadcast(&self) -> &HashMap<ClusterId, BTreeSet<ConnectPoint>> {
        self.broadcast_sets.get_or_init(|| {
            let index = self.cluster_index();
            let weigher = HopCountLinkWeigher::new(self.graph.vertex_count());
            let mut sets = HashMap::new();

            for cluster in index.clusters.values() {
                let members = index.devices.get(&cluster.id).cloned().unwrap_or_default();
                let result =
                    DijkstraSearch.search(&self.graph, &cluster.root, None, &weigher, ALL_PATHS);

                let mut points = BTreeSet::new();
                for (device, parents) in result.parents() {
                    if !members.contains(device) {
                        continue;
                    }
                    if let Some(link) = parents
                        .iter()
                        .find(|l| members.contains(&l.src.device_id))
                    {
                        points.insert(link.src.clone());
                        points.insert(link.dst.clone());
                    }
                }
                sets.insert(cluster.id, points);
            }
            sets
        })
    }

    /// Whether traffic may be flooded out of `point`
    ///
    /// Host-facing points always qualify. Infrastructure points qualify when
    /// they lie on their cluster's flood tree, or when no tree is known.
    pub fn is_broadcast_point(&self, point: &ConnectPoint) -> bool {
        if !self.is_infrastructure(point) {
            return true;
        }
        let Some(cluster) = self.cluster_for_device(&point.device_id) else {
            return true;
        };
        match self.broadcast().get(&cluster.id) {
            Some(points) if !points.is_empty() => points.contains(point),
            _ => true,
        }
    }

    pub fn broadcast_points(&self, id: ClusterId) -> BTreeSet<ConnectPoint> {
        self.broadcast().get(&id).cloned().unwrap_or_default()
    }

    pub fn broadcast_set_size(&self, id: ClusterId) -> usize {
        self.broadcast().get(&id).map(BTreeSet::len).unwrap_or(0)
    }

    // Paths

    /// All equal-cost shortest paths under the default weigher
    pub fn get_paths(&self, src: &DeviceId, dst: &DeviceId) -> Vec<Path> {
        if !self.settings.cache_paths {
            return self.compute_paths(src, dst, self.default_weigher.as_ref());
        }

        let key = (src.clone(), dst.clone());
        if let Some(cached) = self.path_cache.get(&key) {
            metrics_otel::record_path_computation("paths", true);
            return cached.as_ref().clone();
        }
        let paths = self.compute_paths(src, dst, self.default_weigher.as_ref());
        self.path_cache.insert(key, Arc::new(paths.clone()));
        paths
    }

    /// All equal-cost shortest paths under a caller-supplied weigher
    pub fn get_paths_with(
        &self,
        src: &DeviceId,
        dst: &DeviceId,
        weigher: &dyn EdgeWeigher<Link>,
    ) -> Vec<Path> {
        self.compute_paths(src, dst, weigher)
    }

    fn compute_paths(
        &self,
        src: &DeviceId,
        dst: &DeviceId,
        weigher: &dyn EdgeWeigher<Link>,
    ) -> Vec<Path> {
        metrics_otel::record_path_computation("paths", false);
        let mut paths: Vec<Path> = self
            .settings
            .search
            .search(&self.graph, src, Some(dst), weigher, ALL_PATHS)
            .into_paths()
            .into_iter()
            .map(Path::from)
            .collect();
        paths.sort_by(Path::canonical_cmp);
        paths.dedup();
        paths
    }

    /// Link-disjoint primary/backup pairs; pairs without a backup are omitted
    pub fn get_disjoint_paths(&self, src: &DeviceId, dst: &DeviceId) -> Vec<DisjointPath> {
        self.get_disjoint_paths_with(src, dst, self.default_weigher.as_ref())
    }

    pub fn get_disjoint_paths_with(
        &self,
        src: &DeviceId,
        dst: &DeviceId,
        weigher: &dyn EdgeWeigher<Link>,
    ) -> Vec<DisjointPath> {
        metrics_otel::record_path_computation("disjoint", false);
        let mut pairs: Vec<DisjointPath> = disjoint_paths(&self.graph, src, dst, weigher)
            .into_iter()
            .filter(|pair| pair.has_backup())
            .map(DisjointPath::from)
            .collect();
        sort_disjoint(&mut pairs);
        pairs
    }

    /// Disjoint pairs whose backup shares no risk group with the primary
    pub fn get_srlg_disjoint_paths(
        &self,
        src: &DeviceId,
        dst: &DeviceId,
        risk_profile: &RiskProfile<Link>,
    ) -> Vec<DisjointPath> {
        self.get_srlg_disjoint_paths_with(src, dst, self.default_weigher.as_ref(), risk_profile)
    }

    pub fn get_srlg_disjoint_paths_with(
        &self,
        src: &DeviceId,
        dst: &DeviceId,
        weigher: &dyn EdgeWeigher<Link>,
        risk_profile: &RiskProfile<Link>,
    ) -> Vec<DisjointPath> {
        metrics_otel::record_path_computation("srlg", false);
        let mut pairs: Vec<DisjointPath> = srlg_disjoint_paths(
            &self.graph,
            src,
            dst,
            weigher,
            risk_profile,
            self.settings.srlg_candidate_limit,
        )
        .into_iter()
        .filter(|pair| pair.has_backup())
        .map(DisjointPath::from)
        .collect();
        sort_disjoint(&mut pairs);
        pairs
    }

    /// Up to `k` loopless paths in ascending cost, capped by the configured limit
    pub fn get_k_shortest_paths(&self, src: &DeviceId, dst: &DeviceId, k: usize) -> Vec<Path> {
        self.get_k_shortest_paths_with(src, dst, k, self.default_weigher.as_ref())
    }

    pub fn get_k_shortest_paths_with(
        &self,
        src: &DeviceId,
        dst: &DeviceId,
        k: usize,
        weigher: &dyn EdgeWeigher<Link>,
    ) -> Vec<Path> {
        metrics_otel::record_path_computation("k_shortest", false);
        let k = k.min(self.settings.max_k_shortest);
        k_shortest_paths(&self.graph, src, dst, weigher, k)
            .into_iter()
            .map(Path::from)
            .collect()
    }
}

fn sort_disjoint(pairs: &mut [DisjointPath]) {
    pairs.sort_by(|a, b| {
        a.cost()
            .value()
            .total_cmp(&b.cost().value())
            .then_with(|| a.primary.canonical_cmp(&b.primary))
    });
}
