//! Yen's k-shortest loopless paths

use super::search::{enumerate_paths, graph_arcs, shortest_tree, DirectedArc};
use super::{EdgeWeigher, Graph, GraphEdge, GraphPath, GraphVertex};
use std::collections::HashSet;

/// Up to `k` loopless paths in ascending cost order
pub fn k_shortest_paths<V: GraphVertex, E: GraphEdge<V>>(
    graph: &Graph<V, E>,
    src: &V,
    dst: &V,
    weigher: &dyn EdgeWeigher<E>,
    k: usize,
) -> Vec<GraphPath<V, E>> {
    let (Some(s), Some(d)) = (graph.vertex_index(src), graph.vertex_index(dst)) else {
        return Vec::new();
    };
    if s == d || k == 0 {
        return Vec::new();
    }

    let arcs = graph_arcs(graph, weigher);
    let costs: Vec<f64> = arcs.iter().map(|a| a.cost).collect();
    k_shortest_arc_paths(graph, &arcs, s, d, k)
        .iter()
        .filter_map(|ids| graph.to_path(ids, &costs))
        .collect()
}

/// Index-level Yen search shared with the SRLG search
pub(crate) fn k_shortest_arc_paths<V: GraphVertex, E: GraphEdge<V>>(
    graph: &Graph<V, E>,
    arcs: &[DirectedArc],
    s: usize,
    d: usize,
    k: usize,
) -> Vec<Vec<usize>> {
    if k == 0 {
        return Vec::new();
    }
    let costs: Vec<f64> = arcs.iter().map(|a| a.cost).collect();
    let n = graph.vertex_count();
    let path_cost = |ids: &[usize]| ids.iter().map(|&e| costs[e]).sum::<f64>();

    let tree = shortest_tree(n, arcs, graph.outgoing(), s, &|_| true);
    let Some(first) = enumerate_paths(&tree, arcs, s, d, 1).into_iter().next() else {
        return Vec::new();
    };

    let mut accepted: Vec<Vec<usize>> = vec![first];
    let mut candidates: Vec<Vec<usize>> = Vec::new();
    let mut known: HashSet<Vec<usize>> = accepted.iter().cloned().collect();

    while accepted.len() < k {
        let Some(previous) = accepted.last().cloned() else {
            break;
        };

        for spur_at in 0..previous.len() {
            let spur_vertex = arcs[previous[spur_at]].from;
            let root = &previous[..spur_at];

            let banned_arcs: HashSet<usize> = accepted
                .iter()
                .filter(|p| p.len() > spur_at && p[..spur_at] == *root)
                .map(|p| p[spur_at])
                .collect();
            let banned_vertices: HashSet<usize> = root.iter().map(|&e| arcs[e].from).collect();

            let allowed = |arc_id: usize| {
                !banned_arcs.contains(&arc_id)
                    && !banned_vertices.contains(&arcs[arc_id].to)
                    && !banned_vertices.contains(&arcs[arc_id].from)
            };
            let spur_tree = shortest_tree(n, arcs, graph.outgoing(), spur_vertex, &allowed);
            let Some(spur) = enumerate_paths(&spur_tree, arcs, spur_vertex, d, 1)
                .into_iter()
                .next()
            else {
                continue;
            };

            let mut total = root.to_vec();
            total.extend(spur);
            if known.insert(total.clone()) {
                candidates.push(total);
            }
        }

        if candidates.is_empty() {
            break;
        }
        candidates.sort_by(|a, b| {
            path_cost(a)
                .total_cmp(&path_cost(b))
                .then_with(|| a.len().cmp(&b.len()))
                .then_with(|| a.cmp(b))
        });
        accepted.push(candidates.remove(0));
    }

    accepted
}
