//! Route store configuration

use super::defaults::*;
use crate::error::{SdnError, SdnResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Capacity of the departed-node work queue
    pub reaper_queue_capacity: usize,

    /// Push best routes to the next-hop device when this node is its master
    pub program_routes: bool,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            reaper_queue_capacity: DEFAULT_REAPER_QUEUE_CAPACITY,
            program_routes: true,
        }
    }
}

impl RouteConfig {
    pub fn validate(&self) -> SdnResult<()> {
        if self.reaper_queue_capacity == 0 {
            return Err(SdnError::configuration(
                "routes.reaper_queue_capacity",
                "must be positive",
            ));
        }
        Ok(())
    }
}
