//! Tarjan strongly connected components

use super::{EdgeWeigher, Graph, GraphEdge, GraphVertex};

/// Components in the order Tarjan completes them, each with its vertices
/// (ascending) and the viable edges internal to it
#[derive(Debug, Clone)]
pub struct SccResult<V, E> {
    pub clusters: Vec<Vec<V>>,
    pub cluster_edges: Vec<Vec<E>>,
}

impl<V, E> SccResult<V, E> {
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }
}

/// Compute strongly connected components, treating edges with a
/// non-viable weight as absent
pub fn strongly_connected_components<V: GraphVertex, E: GraphEdge<V>>(
    graph: &Graph<V, E>,
    weigher: &dyn EdgeWeigher<E>,
) -> SccResult<V, E> {
    let n = graph.vertex_count();
    let viable: Vec<bool> = graph
        .edges()
        .iter()
        .map(|e| weigher.weight(e).is_viable())
        .collect();

    let mut index = vec![usize::MAX; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut next_index = 0;
    let mut components: Vec<Vec<usize>> = Vec::new();

    for root in 0..n {
        if index[root] != usize::MAX {
            continue;
        }

        // (vertex, position in its outgoing edge list)
        let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
        index[root] = next_index;
        lowlink[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;

        while let Some(frame) = frames.last_mut() {
            let v = frame.0;
            let outgoing = &graph.outgoing()[v];
            if frame.1 < outgoing.len() {
                let edge = outgoing[frame.1];
                frame.1 += 1;
                if !viable[edge] {
                    continue;
                }
                let (_, w) = graph.ends(edge);
                if index[w] == usize::MAX {
                    index[w] = next_index;
                    lowlink[w] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    frames.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[v]);
            }

            if lowlink[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                component.sort_unstable();
                components.push(component);
            }
        }
    }

    let mut membership = vec![0usize; n];
    for (c, component) in components.iter().enumerate() {
        for &v in component {
            membership[v] = c;
        }
    }

    let mut cluster_edges: Vec<Vec<E>> = vec![Vec::new(); components.len()];
    for (id, edge) in graph.edges().iter().enumerate() {
        let (s, d) = graph.ends(id);
        if viable[id] && membership[s] == membership[d] {
            cluster_edges[membership[s]].push(edge.clone());
        }
    }

    SccResult {
        clusters: components
            .into_iter()
            .map(|c| c.into_iter().map(|v| graph.vertex_at(v).clone()).collect())
            .collect(),
        cluster_edges,
    }
}
