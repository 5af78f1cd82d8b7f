//! Directed graphs and path search algorithms
//!
//! The graph is immutable once built. Vertices and edges are interned into
//! dense indices so that the algorithms work on plain vectors; results are
//! translated back into the caller's vertex and edge types.

pub mod bfs;
pub mod dijkstra;
pub mod kshortest;
pub mod search;
pub mod srlg;
pub mod suurballe;
pub mod tarjan;
pub mod weight;

pub use bfs::BreadthFirstSearch;
pub use dijkstra::DijkstraSearch;
pub use kshortest::k_shortest_paths;
pub use search::{GraphPathSearch, SearchResult, ALL_PATHS};
pub use srlg::{srlg_disjoint_paths, RiskProfile};
pub use suurballe::disjoint_paths;
pub use tarjan::{strongly_connected_components, SccResult};
pub use weight::{EdgeWeigher, UnitWeigher, Weight};

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

pub trait GraphVertex: Clone + Eq + Hash + Ord + Debug + Send + Sync {}

impl<T> GraphVertex for T where T: Clone + Eq + Hash + Ord + Debug + Send + Sync {}

pub trait GraphEdge<V>: Clone + Eq + Hash + Debug + Send + Sync {
    fn src(&self) -> &V;
    fn dst(&self) -> &V;
}

/// Immutable directed multigraph
#[derive(Debug, Clone)]
pub struct Graph<V, E> {
    vertices: Vec<V>,
    index: HashMap<V, usize>,
    edges: Vec<E>,
    ends: Vec<(usize, usize)>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
}

impl<V: GraphVertex, E: GraphEdge<V>> Graph<V, E> {
    /// Build a graph; vertices are kept in ascending order, duplicate edges
    /// are dropped and edges whose endpoints are not vertices are ignored.
    pub fn new(vertices: impl IntoIterator<Item = V>, edges: impl IntoIterator<Item = E>) -> Self {
        let vertices: Vec<V> = vertices
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index: HashMap<V, usize> = vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (v.clone(), i))
            .collect();

        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        let mut ends = Vec::new();
        let mut outgoing = vec![Vec::new(); vertices.len()];
        let mut incoming = vec![Vec::new(); vertices.len()];

        for edge in edges {
            let (Some(&s), Some(&d)) = (index.get(edge.src()), index.get(edge.dst())) else {
                continue;
            };
            if !seen.insert(edge.clone()) {
                continue;
            }
            let id = kept.len();
            outgoing[s].push(id);
            incoming[d].push(id);
            ends.push((s, d));
            kept.push(edge);
        }

        Self {
            vertices,
            index,
            edges: kept,
            ends,
            outgoing,
            incoming,
        }
    }

    pub fn vertices(&self) -> &[V] {
        &self.vertices
    }

    pub fn edges(&self) -> &[E] {
        &self.edges
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains_vertex(&self, vertex: &V) -> bool {
        self.index.contains_key(vertex)
    }

    pub fn edges_from(&self, vertex: &V) -> Vec<&E> {
        self.index
            .get(vertex)
            .map(|&i| self.outgoing[i].iter().map(|&e| &self.edges[e]).collect())
            .unwrap_or_default()
    }

    pub fn edges_to(&self, vertex: &V) -> Vec<&E> {
        self.index
            .get(vertex)
            .map(|&i| self.incoming[i].iter().map(|&e| &self.edges[e]).collect())
            .unwrap_or_default()
    }

    pub(crate) fn vertex_index(&self, vertex: &V) -> Option<usize> {
        self.index.get(vertex).copied()
    }

    pub(crate) fn vertex_at(&self, index: usize) -> &V {
        &self.vertices[index]
    }

    pub(crate) fn edge_at(&self, index: usize) -> &E {
        &self.edges[index]
    }

    pub(crate) fn ends(&self, edge: usize) -> (usize, usize) {
        self.ends[edge]
    }

    pub(crate) fn outgoing(&self) -> &[Vec<usize>] {
        &self.outgoing
    }

    /// Edge costs for one search; non-viable edges become infinite
    pub(crate) fn arc_costs(&self, weigher: &dyn EdgeWeigher<E>) -> Vec<f64> {
        self.edges
            .iter()
            .map(|edge| {
                let weight = weigher.weight(edge);
                if weight.is_viable() {
                    weight.value()
                } else {
                    f64::INFINITY
                }
            })
            .collect()
    }

    pub(crate) fn to_path(&self, edge_ids: &[usize], costs: &[f64]) -> Option<GraphPath<V, E>> {
        let first = *edge_ids.first()?;
        let last = *edge_ids.last()?;
        Some(GraphPath {
            src: self.vertices[self.ends[first].0].clone(),
            dst: self.vertices[self.ends[last].1].clone(),
            edges: edge_ids.iter().map(|&e| self.edges[e].clone()).collect(),
            cost: Weight::new(edge_ids.iter().map(|&e| costs[e]).sum()),
        })
    }
}

/// Ordered list of edges from `src` to `dst` with its aggregate cost
#[derive(Debug, Clone, PartialEq)]
pub struct GraphPath<V, E> {
    pub src: V,
    pub dst: V,
    pub edges: Vec<E>,
    pub cost: Weight,
}

impl<V, E: PartialEq> GraphPath<V, E> {
    pub fn hop_count(&self) -> usize {
        self.edges.len()
    }

    pub fn shares_edge_with(&self, other: &GraphPath<V, E>) -> bool {
        self.edges.iter().any(|e| other.edges.contains(e))
    }
}

/// Primary path with an optional edge-disjoint backup
#[derive(Debug, Clone, PartialEq)]
pub struct DisjointPathPair<V, E> {
    pub primary: GraphPath<V, E>,
    pub backup: Option<GraphPath<V, E>>,
}

impl<V, E> DisjointPathPair<V, E> {
    pub fn has_backup(&self) -> bool {
        self.backup.is_some()
    }

    /// Combined cost of both paths
    pub fn cost(&self) -> Weight {
        match &self.backup {
            Some(backup) => self.primary.cost + backup.cost,
            None => self.primary.cost,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_graph_drops_dangling_and_duplicate_edges() {
        let graph = Graph::new(
            vec!["a", "b"],
            vec![edge("a", "b", 1), edge("a", "b", 1), edge("a", "z", 1)],
        );
        assert_eq!(graph.vertex_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.edges_from(&"a").len(), 1);
        assert_eq!(graph.edges_to(&"b").len(), 1);
        assert!(graph.edges_from(&"z").is_empty());
    }
}
