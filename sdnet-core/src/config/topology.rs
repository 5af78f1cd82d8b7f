//! Topology builder and path computation configuration

use super::defaults::*;
use crate::error::{SdnError, SdnResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Maximum number of network events folded into one snapshot rebuild
    pub max_event_batch: usize,

    /// Capacity of the inbound network event queue
    pub event_queue_capacity: usize,

    /// Memoize default-weight path queries per snapshot
    pub path_cache: bool,

    /// Upper bound accepted for K-shortest-path queries
    pub max_k_shortest: usize,

    /// Number of primary candidates tried by the SRLG-aware search
    pub srlg_candidate_limit: usize,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            max_event_batch: DEFAULT_TOPOLOGY_MAX_EVENT_BATCH,
            event_queue_capacity: DEFAULT_TOPOLOGY_EVENT_QUEUE,
            path_cache: DEFAULT_PATH_CACHE_ENABLED,
            max_k_shortest: DEFAULT_MAX_K_SHORTEST_PATHS,
            srlg_candidate_limit: DEFAULT_SRLG_CANDIDATE_LIMIT,
        }
    }
}

impl TopologyConfig {
    pub fn validate(&self) -> SdnResult<()> {
        if self.max_event_batch == 0 {
            return Err(SdnError::configuration(
                "topology.max_event_batch",
                "must be positive",
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(SdnError::configuration(
                "topology.event_queue_capacity",
                "must be positive",
            ));
        }
        if self.srlg_candidate_limit == 0 {
            return Err(SdnError::configuration(
                "topology.srlg_candidate_limit",
                "must be positive",
            ));
        }
        Ok(())
    }
}
