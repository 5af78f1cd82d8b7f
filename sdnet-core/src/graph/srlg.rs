//! Shared-risk-link-group aware disjoint paths
//!
//! Candidate primaries come from Yen's k-shortest search. For each one the
//! backup is the shortest path avoiding both the primary's edges and every
//! edge sharing a risk group with it; the cheapest feasible pair wins.

use super::kshortest::k_shortest_arc_paths;
use super::search::{enumerate_paths, graph_arcs, shortest_tree};
use super::{DisjointPathPair, EdgeWeigher, Graph, GraphEdge, GraphVertex};
use crate::error::{SdnError, SdnResult};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;

/// Risk groups of each edge
#[derive(Debug, Clone)]
pub struct RiskProfile<E: Hash + Eq> {
    groups: HashMap<E, BTreeSet<String>>,
}

impl<E: Hash + Eq> Default for RiskProfile<E> {
    fn default() -> Self {
        Self {
            groups: HashMap::new(),
        }
    }
}

impl<E: Hash + Eq> RiskProfile<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a profile from `(edge, group)` pairs
    pub fn from_pairs(pairs: impl IntoIterator<Item = (E, String)>) -> SdnResult<Self> {
        let mut profile = Self::new();
        for (edge, group) in pairs {
            profile.assign(edge, group)?;
        }
        Ok(profile)
    }

    /// Put `edge` into the risk group `group`
    pub fn assign(&mut self, edge: E, group: impl Into<String>) -> SdnResult<()> {
        let group = group.into();
        if group.trim().is_empty() {
            return Err(SdnError::validation(
                "risk_profile",
                "shared risk group key must not be empty",
            ));
        }
        self.groups.entry(edge).or_default().insert(group);
        Ok(())
    }

    pub fn groups_of(&self, edge: &E) -> Option<&BTreeSet<String>> {
        self.groups.get(edge)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Cheapest primary/backup pair whose paths share neither edges nor risk
/// groups, considering at most `candidate_limit` primaries. Empty when no
/// such pair exists.
pub fn srlg_disjoint_paths<V: GraphVertex, E: GraphEdge<V>>(
    graph: &Graph<V, E>,
    src: &V,
    dst: &V,
    weigher: &dyn EdgeWeigher<E>,
    profile: &RiskProfile<E>,
    candidate_limit: usize,
) -> Vec<DisjointPathPair<V, E>> {
    let (Some(s), Some(d)) = (graph.vertex_index(src), graph.vertex_index(dst)) else {
        return Vec::new();
    };
    if s == d {
        return Vec::new();
    }

    let arcs = graph_arcs(graph, weigher);
    let costs: Vec<f64> = arcs.iter().map(|a| a.cost).collect();
    let cost = |ids: &[usize]| ids.iter().map(|&e| costs[e]).sum::<f64>();
    let groups_of = |edge: usize| profile.groups_of(graph.edge_at(edge));

    let mut best: Option<(f64, Vec<usize>, Vec<usize>)> = None;

    for primary in k_shortest_arc_paths(graph, &arcs, s, d, candidate_limit) {
        let used: HashSet<usize> = primary.iter().copied().collect();
        let risks: BTreeSet<&String> = primary
            .iter()
            .filter_map(|&e| groups_of(e))
            .flatten()
            .collect();

        let allowed = |arc_id: usize| {
            !used.contains(&arc_id)
                && groups_of(arc_id)
                    .map(|g| g.iter().all(|group| !risks.contains(group)))
                    .unwrap_or(true)
        };
        let tree = shortest_tree(graph.vertex_count(), &arcs, graph.outgoing(), s, &allowed);
        let Some(backup) = enumerate_paths(&tree, &arcs, s, d, 1).into_iter().next() else {
            continue;
        };

        let total = cost(&primary) + cost(&backup);
        let better = best
            .as_ref()
            .map(|(best_total, _, _)| total < *best_total)
            .unwrap_or(true);
        if better {
            best = Some((total, primary, backup));
        }
    }

    best.and_then(|(_, primary, backup)| {
        Some(DisjointPathPair {
            primary: graph.to_path(&primary, &costs)?,
            backup: Some(graph.to_path(&backup, &costs)?),
        })
    })
    .into_iter()
    .collect()
}
