//! Breadth-first search counting hops and ignoring weights
//!
//! Non-viable edges are still excluded. Path costs are reported with the
//! supplied weigher so results stay comparable with the other searches.

use super::search::{enumerate_paths, graph_arcs, shortest_tree, DirectedArc};
use super::{EdgeWeigher, Graph, GraphEdge, GraphPathSearch, GraphVertex, SearchResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct BreadthFirstSearch;

impl<V: GraphVertex, E: GraphEdge<V>> GraphPathSearch<V, E> for BreadthFirstSearch {
    fn name(&self) -> &'static str {
        "bfs"
    }

    fn search(
        &self,
        graph: &Graph<V, E>,
        src: &V,
        dst: Option<&V>,
        weigher: &dyn EdgeWeigher<E>,
        max_paths: usize,
    ) -> SearchResult<V, E> {
        let Some(s) = graph.vertex_index(src) else {
            return SearchResult::empty(src.clone());
        };

        let weighted = graph_arcs(graph, weigher);
        let hops: Vec<DirectedArc> = weighted
            .iter()
            .map(|arc| DirectedArc {
                cost: if arc.cost.is_finite() { 1.0 } else { f64::INFINITY },
                ..*arc
            })
            .collect();
        let tree = shortest_tree(graph.vertex_count(), &hops, graph.outgoing(), s, &|_| true);
        let costs: Vec<f64> = weighted.iter().map(|a| a.cost).collect();

        let paths = match dst.and_then(|d| graph.vertex_index(d)) {
            Some(d) => enumerate_paths(&tree, &hops, s, d, max_paths)
                .iter()
                .filter_map(|ids| graph.to_path(ids, &costs))
                .collect(),
            None => Vec::new(),
        };

        SearchResult::from_tree(graph, src.clone(), &tree, paths)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::super::ALL_PATHS;
    use super::*;

    #[test]
    fn test_fewest_hops_wins_over_weight() {
        let graph = bidirectional(&[("A", "B", 10), ("A", "C", 1), ("C", "D", 1), ("D", "B", 1)]);
        let result = BreadthFirstSearch.search(&graph, &"A", Some(&"B"), &weigher(), ALL_PATHS);
        assert_eq!(result.paths().len(), 1);
        assert_eq!(hops(&result.paths()[0]), vec!["A", "B"]);
        assert_eq!(result.paths()[0].cost.value(), 10.0);
    }
}
