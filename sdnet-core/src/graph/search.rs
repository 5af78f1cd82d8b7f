//! Shared search machinery
//!
//! The index-level Dijkstra here is used by every algorithm in this module:
//! plain shortest paths, Suurballe's residual search, Yen's spur searches
//! and the SRLG backup search.

use super::{EdgeWeigher, Graph, GraphEdge, GraphPath, GraphVertex, Weight};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

/// Requests every equal-cost path
pub const ALL_PATHS: usize = usize::MAX;

/// Costs closer than this are treated as equal
pub(crate) const EPSILON: f64 = 1e-9;

/// Pluggable path search algorithm
pub trait GraphPathSearch<V, E>: Send + Sync {
    fn name(&self) -> &'static str;

    /// Search from `src`; with `dst` set, return at most `max_paths`
    /// lowest-cost paths to it. Missing endpoints yield an empty result.
    fn search(
        &self,
        graph: &Graph<V, E>,
        src: &V,
        dst: Option<&V>,
        weigher: &dyn EdgeWeigher<E>,
        max_paths: usize,
    ) -> SearchResult<V, E>;
}

/// Outcome of a single-source search
#[derive(Debug, Clone)]
pub struct SearchResult<V, E> {
    src: V,
    costs: BTreeMap<V, Weight>,
    parents: BTreeMap<V, Vec<E>>,
    paths: Vec<GraphPath<V, E>>,
}

impl<V: GraphVertex, E: GraphEdge<V>> SearchResult<V, E> {
    pub(crate) fn empty(src: V) -> Self {
        Self {
            src,
            costs: BTreeMap::new(),
            parents: BTreeMap::new(),
            paths: Vec::new(),
        }
    }

    pub(crate) fn from_tree(
        graph: &Graph<V, E>,
        src: V,
        tree: &ShortestTree,
        paths: Vec<GraphPath<V, E>>,
    ) -> Self {
        let mut costs = BTreeMap::new();
        let mut parents = BTreeMap::new();
        for (i, dist) in tree.dist.iter().enumerate() {
            if dist.is_finite() {
                costs.insert(graph.vertex_at(i).clone(), Weight::new(*dist));
            }
            if !tree.parents[i].is_empty() {
                parents.insert(
                    graph.vertex_at(i).clone(),
                    tree.parents[i]
                        .iter()
                        .map(|&e| graph.edge_at(e).clone())
                        .collect(),
                );
            }
        }
        Self {
            src,
            costs,
            parents,
            paths,
        }
    }

    pub fn src(&self) -> &V {
        &self.src
    }

    /// Cost of reaching every reachable vertex
    pub fn costs(&self) -> &BTreeMap<V, Weight> {
        &self.costs
    }

    /// Parent edges of every reached vertex, first-discovered first
    pub fn parents(&self) -> &BTreeMap<V, Vec<E>> {
        &self.parents
    }

    pub fn paths(&self) -> &[GraphPath<V, E>] {
        &self.paths
    }

    pub fn into_paths(self) -> Vec<GraphPath<V, E>> {
        self.paths
    }
}

/// Directed arc of an index graph
#[derive(Debug, Clone, Copy)]
pub(crate) struct DirectedArc {
    pub from: usize,
    pub to: usize,
    pub cost: f64,
}

/// Distances and equal-cost parent arcs from one source
#[derive(Debug, Clone)]
pub(crate) struct ShortestTree {
    pub dist: Vec<f64>,
    pub parents: Vec<Vec<usize>>,
}

#[derive(PartialEq)]
struct HeapEntry {
    cost: f64,
    vertex: usize,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap on cost, then on vertex index for determinism
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.vertex.cmp(&self.vertex))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dijkstra over an index graph, keeping every equal-cost parent arc.
/// Arcs with infinite cost or rejected by `allowed` are skipped.
pub(crate) fn shortest_tree(
    vertex_count: usize,
    arcs: &[DirectedArc],
    outgoing: &[Vec<usize>],
    src: usize,
    allowed: &dyn Fn(usize) -> bool,
) -> ShortestTree {
    let mut dist = vec![f64::INFINITY; vertex_count];
    let mut parents: Vec<Vec<usize>> = vec![Vec::new(); vertex_count];
    let mut settled = vec![false; vertex_count];
    let mut heap = BinaryHeap::new();

    dist[src] = 0.0;
    heap.push(HeapEntry {
        cost: 0.0,
        vertex: src,
    });

    while let Some(HeapEntry { cost, vertex }) = heap.pop() {
        if settled[vertex] || cost > dist[vertex] + EPSILON {
            continue;
        }
        settled[vertex] = true;

        for &arc_id in &outgoing[vertex] {
            let arc = arcs[arc_id];
            if !arc.cost.is_finite() || !allowed(arc_id) || arc.to == src {
                continue;
            }
            let candidate = cost + arc.cost;
            if candidate < dist[arc.to] - EPSILON {
                dist[arc.to] = candidate;
                parents[arc.to].clear();
                parents[arc.to].push(arc_id);
                heap.push(HeapEntry {
                    cost: candidate,
                    vertex: arc.to,
                });
            } else if (candidate - dist[arc.to]).abs() <= EPSILON
                && !parents[arc.to].contains(&arc_id)
            {
                parents[arc.to].push(arc_id);
            }
        }
    }

    ShortestTree { dist, parents }
}

/// Enumerate up to `max_paths` shortest arc sequences from `src` to `dst`
pub(crate) fn enumerate_paths(
    tree: &ShortestTree,
    arcs: &[DirectedArc],
    src: usize,
    dst: usize,
    max_paths: usize,
) -> Vec<Vec<usize>> {
    let mut found = Vec::new();
    if src == dst || !tree.dist[dst].is_finite() || max_paths == 0 {
        return found;
    }

    let mut on_path = vec![false; tree.dist.len()];
    let mut reversed = Vec::new();
    walk_back(
        tree,
        arcs,
        src,
        dst,
        max_paths,
        &mut on_path,
        &mut reversed,
        &mut found,
    );
    found
}

#[allow(clippy::too_many_arguments)]
fn walk_back(
    tree: &ShortestTree,
    arcs: &[DirectedArc],
    src: usize,
    at: usize,
    max_paths: usize,
    on_path: &mut Vec<bool>,
    reversed: &mut Vec<usize>,
    found: &mut Vec<Vec<usize>>,
) {
    if found.len() >= max_paths {
        return;
    }
    if at == src {
        found.push(reversed.iter().rev().copied().collect());
        return;
    }
    on_path[at] = true;
    for &arc_id in &tree.parents[at] {
        let from = arcs[arc_id].from;
        if on_path[from] {
            continue;
        }
        reversed.push(arc_id);
        walk_back(tree, arcs, src, from, max_paths, on_path, reversed, found);
        reversed.pop();
    }
    on_path[at] = false;
}

/// Arcs of a graph for one weigher
pub(crate) fn graph_arcs<V: GraphVertex, E: GraphEdge<V>>(
    graph: &Graph<V, E>,
    weigher: &dyn EdgeWeigher<E>,
) -> Vec<DirectedArc> {
    graph
        .arc_costs(weigher)
        .into_iter()
        .enumerate()
        .map(|(id, cost)| {
            let (from, to) = graph.ends(id);
            DirectedArc { from, to, cost }
        })
        .collect()
}

pub(crate) fn arc_costs(arcs: &[DirectedArc]) -> Vec<f64> {
    arcs.iter().map(|a| a.cost).collect()
}
