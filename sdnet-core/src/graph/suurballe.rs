//! Suurballe edge-disjoint path pairs
//!
//! For every equal-cost shortest path a second search runs over the
//! residual graph: edges of the first path are reversed at zero cost and
//! every other edge is re-weighted with the reduced cost
//! `w(u, v) + d(u) - d(v)`. Edges used in both directions cancel and the
//! remaining edge set splits into two disjoint paths.

use super::search::{enumerate_paths, graph_arcs, shortest_tree, DirectedArc, ALL_PATHS};
use super::{DisjointPathPair, EdgeWeigher, Graph, GraphEdge, GraphVertex};
use std::collections::{BTreeSet, HashSet};

/// Minimum-cost edge-disjoint path pairs from `src` to `dst`
///
/// One pair is produced per distinct shortest primary; pairs covering the
/// same two paths are reported once. When no disjoint second path exists
/// the pair carries no backup.
pub fn disjoint_paths<V: GraphVertex, E: GraphEdge<V>>(
    graph: &Graph<V, E>,
    src: &V,
    dst: &V,
    weigher: &dyn EdgeWeigher<E>,
) -> Vec<DisjointPathPair<V, E>> {
    let (Some(s), Some(d)) = (graph.vertex_index(src), graph.vertex_index(dst)) else {
        return Vec::new();
    };
    if s == d {
        return Vec::new();
    }

    let arcs = graph_arcs(graph, weigher);
    let costs: Vec<f64> = arcs.iter().map(|a| a.cost).collect();
    let tree = shortest_tree(graph.vertex_count(), &arcs, graph.outgoing(), s, &|_| true);

    let mut seen: HashSet<(BTreeSet<usize>, BTreeSet<usize>)> = HashSet::new();
    let mut pairs = Vec::new();

    for primary in enumerate_paths(&tree, &arcs, s, d, ALL_PATHS) {
        let (first, second) = match backup_for(graph, &arcs, &tree.dist, &primary, s, d) {
            Some((a, b)) => {
                let cost = |ids: &[usize]| ids.iter().map(|&e| costs[e]).sum::<f64>();
                if cost(&b) < cost(&a) {
                    (b, Some(a))
                } else {
                    (a, Some(b))
                }
            }
            None => (primary, None),
        };

        let first_set: BTreeSet<usize> = first.iter().copied().collect();
        let second_set: BTreeSet<usize> = second.iter().flatten().copied().collect();
        let key = if first_set <= second_set || second_set.is_empty() {
            (first_set, second_set)
        } else {
            (second_set, first_set)
        };
        if !seen.insert(key) {
            continue;
        }

        let Some(primary_path) = graph.to_path(&first, &costs) else {
            continue;
        };
        let backup_path = second.and_then(|ids| graph.to_path(&ids, &costs));
        pairs.push(DisjointPathPair {
            primary: primary_path,
            backup: backup_path,
        });
    }

    pairs
}

/// Residual search for one primary; returns the two disjoint edge lists
fn backup_for<V: GraphVertex, E: GraphEdge<V>>(
    graph: &Graph<V, E>,
    arcs: &[DirectedArc],
    dist: &[f64],
    primary: &[usize],
    s: usize,
    d: usize,
) -> Option<(Vec<usize>, Vec<usize>)> {
    let on_primary: HashSet<usize> = primary.iter().copied().collect();
    let n = graph.vertex_count();

    // residual arc -> (original edge, reversed)
    let mut residual = Vec::with_capacity(arcs.len());
    let mut origin = Vec::with_capacity(arcs.len());
    let mut outgoing = vec![Vec::new(); n];

    for (id, arc) in arcs.iter().enumerate() {
        if !arc.cost.is_finite() || !dist[arc.from].is_finite() || !dist[arc.to].is_finite() {
            continue;
        }
        let residual_arc = if on_primary.contains(&id) {
            DirectedArc {
                from: arc.to,
                to: arc.from,
                cost: 0.0,
            }
        } else {
            DirectedArc {
                from: arc.from,
                to: arc.to,
                cost: (arc.cost + dist[arc.from] - dist[arc.to]).max(0.0),
            }
        };
        outgoing[residual_arc.from].push(residual.len());
        residual.push(residual_arc);
        origin.push((id, on_primary.contains(&id)));
    }

    let tree = shortest_tree(n, &residual, &outgoing, s, &|_| true);
    let second = enumerate_paths(&tree, &residual, s, d, 1).into_iter().next()?;

    let mut edges: BTreeSet<usize> = on_primary.iter().copied().collect();
    for arc_id in second {
        let (edge, reversed) = origin[arc_id];
        if reversed {
            edges.remove(&edge);
        } else {
            edges.insert(edge);
        }
    }

    let first = walk(graph, &mut edges, s, d)?;
    let second = walk(graph, &mut edges, s, d)?;
    Some((first, second))
}

/// Consume edges from `pool` along a walk from `s` to `d`
fn walk<V: GraphVertex, E: GraphEdge<V>>(
    graph: &Graph<V, E>,
    pool: &mut BTreeSet<usize>,
    s: usize,
    d: usize,
) -> Option<Vec<usize>> {
    let mut path = Vec::new();
    let mut at = s;
    while at != d {
        let next = graph.outgoing()[at]
            .iter()
            .copied()
            .find(|e| pool.contains(e))?;
        pool.remove(&next);
        path.push(next);
        at = graph.ends(next).1;
    }
    Some(path)
}
