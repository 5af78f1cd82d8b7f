//! Network topology: snapshots, clusters, broadcast trees and paths

pub mod cluster;
pub mod engine;
pub mod graph;
pub mod manager;
pub mod path;
pub mod snapshot;
pub mod weigher;

pub use cluster::{ClusterId, TopologyCluster};
pub use engine::{PathEngine, PathSettings, SharedPathSearch};
pub use graph::{GraphDescription, TopologyEdge, TopologyGraph, TopologyVertex};
pub use manager::{TopologyEvent, TopologyManager};
pub use path::{DisjointPath, Path};
pub use snapshot::Topology;
pub use weigher::{HopCountLinkWeigher, NoIndirectLinksWeigher, SharedLinkWeigher};
