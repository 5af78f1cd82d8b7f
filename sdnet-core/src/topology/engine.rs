//! Path computation configuration
//!
//! The default link weigher and search algorithm live on a [`PathEngine`]
//! instance rather than in global state. Every snapshot copies the
//! settings in force when it was built, so changing a default never alters
//! the answers of an existing snapshot.

use super::graph::GraphDescription;
use super::snapshot::Topology;
use super::weigher::SharedLinkWeigher;
use crate::config::TopologyConfig;
use crate::graph::{DijkstraSearch, GraphPathSearch};
use crate::types::{DeviceId, Link};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::info;

pub type SharedPathSearch = Arc<dyn GraphPathSearch<DeviceId, Link>>;

#[derive(Clone)]
pub struct PathSettings {
    /// `None` selects hop count with indirect links costed at the vertex count
    pub weigher: Option<SharedLinkWeigher>,
    pub search: SharedPathSearch,
    pub cache_paths: bool,
    pub max_k_shortest: usize,
    pub srlg_candidate_limit: usize,
}

impl PathSettings {
    pub fn from_config(config: &TopologyConfig) -> Self {
        Self {
            weigher: None,
            search: Arc::new(DijkstraSearch),
            cache_paths: config.path_cache,
            max_k_shortest: config.max_k_shortest,
            srlg_candidate_limit: config.srlg_candidate_limit,
        }
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self::from_config(&TopologyConfig::default())
    }
}

impl fmt::Debug for PathSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathSettings")
            .field("custom_weigher", &self.weigher.is_some())
            .field("search", &self.search.name())
            .field("cache_paths", &self.cache_paths)
            .field("max_k_shortest", &self.max_k_shortest)
            .field("srlg_candidate_limit", &self.srlg_candidate_limit)
            .finish()
    }
}

/// Owner of the default path computation strategy and builder of snapshots
pub struct PathEngine {
    settings: RwLock<PathSettings>,
}

impl PathEngine {
    pub fn new(config: &TopologyConfig) -> Self {
        Self {
            settings: RwLock::new(PathSettings::from_config(config)),
        }
    }

    pub fn settings(&self) -> PathSettings {
        self.settings.read().clone()
    }

    /// Install the default weigher for subsequently built snapshots;
    /// `None` restores hop count
    pub fn set_default_link_weigher(&self, weigher: Option<SharedLinkWeigher>) {
        info!(
            "Default link weigher set to {}",
            if weigher.is_some() { "custom" } else { "hop count" }
        );
        self.settings.write().weigher = weigher;
    }

    /// Install the default search algorithm; `None` restores Dijkstra
    pub fn set_default_path_search(&self, search: Option<SharedPathSearch>) {
        let search = search.unwrap_or_else(|| Arc::new(DijkstraSearch));
        info!("Default path search set to {}", search.name());
        self.settings.write().search = search;
    }

    /// Build an immutable snapshot using the current settings
    pub fn build(&self, description: &GraphDescription) -> Arc<Topology> {
        Arc::new(Topology::build(description, self.settings()))
    }
}

impl Default for PathEngine {
    fn default() -> Self {
        Self::new(&TopologyConfig::default())
    }
}
