//! Link weight functions

use crate::graph::{EdgeWeigher, Weight};
use crate::types::{Link, LinkState, LinkType};
use std::sync::Arc;

/// Shareable weight function over topology links
pub type SharedLinkWeigher = Arc<dyn EdgeWeigher<Link>>;

/// Hop count: one per active link, the vertex count for indirect links so
/// they are used only as a last resort, inactive links excluded
#[derive(Debug, Clone, Copy)]
pub struct HopCountLinkWeigher {
    indirect_link_cost: f64,
}

impl HopCountLinkWeigher {
    pub const DEFAULT_INDIRECT_COST: f64 = 1000.0;

    pub fn new(indirect_link_cost: usize) -> Self {
        Self {
            indirect_link_cost: indirect_link_cost as f64,
        }
    }
}

impl Default for HopCountLinkWeigher {
    fn default() -> Self {
        Self {
            indirect_link_cost: Self::DEFAULT_INDIRECT_COST,
        }
    }
}

impl EdgeWeigher<Link> for HopCountLinkWeigher {
    fn weight(&self, link: &Link) -> Weight {
        if link.state == LinkState::Inactive {
            return Weight::NON_VIABLE;
        }
        match link.link_type {
            LinkType::Indirect => Weight::new(self.indirect_link_cost),
            _ => Weight::new(1.0),
        }
    }
}

/// Unit weight that excludes inactive and indirect links; used for
/// cluster computation
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIndirectLinksWeigher;

impl EdgeWeigher<Link> for NoIndirectLinksWeigher {
    fn weight(&self, link: &Link) -> Weight {
        if link.state == LinkState::Inactive || link.link_type == LinkType::Indirect {
            Weight::NON_VIABLE
        } else {
            Weight::new(1.0)
        }
    }
}
