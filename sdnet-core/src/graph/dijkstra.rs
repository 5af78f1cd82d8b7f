//! Dijkstra shortest paths returning every equal-cost path

use super::search::{enumerate_paths, graph_arcs, shortest_tree, arc_costs};
use super::{EdgeWeigher, Graph, GraphEdge, GraphPathSearch, GraphVertex, SearchResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct DijkstraSearch;

impl<V: GraphVertex, E: GraphEdge<V>> GraphPathSearch<V, E> for DijkstraSearch {
    fn name(&self) -> &'static str {
        "dijkstra"
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

        let arcs = graph_arcs(graph, weigher);
        let tree = shortest_tree(graph.vertex_count(), &arcs, graph.outgoing(), s, &|_| true);
        let costs = arc_costs(&arcs);

        let paths = match dst.and_then(|d| graph.vertex_index(d)) {
            Some(d) => enumerate_paths(&tree, &arcs, s, d, max_paths)
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
    use super::super::{Weight, ALL_PATHS};
    use super::*;

    #[test]
    fn test_ring_returns_both_equal_cost_paths() {
        let graph = bidirectional(&[("A", "B", 1), ("B", "C", 1), ("C", "D", 1), ("D", "A", 1)]);
        let result = DijkstraSearch.search(&graph, &"A", Some(&"C"), &weigher(), ALL_PATHS);

        let mut paths: Vec<Vec<&str>> = result.paths().iter().map(hops).collect();
        paths.sort();
        assert_eq!(paths, vec![vec!["A", "B", "C"], vec!["A", "D", "C"]]);
        assert!(result.paths().iter().all(|p| p.cost == Weight::new(2.0)));
    }

    #[test]
    fn test_max_paths_limits_result() {
        let graph = bidirectional(&[("A", "B", 1), ("B", "C", 1), ("C", "D", 1), ("D", "A", 1)]);
        let result = DijkstraSearch.search(&graph, &"A", Some(&"C"), &weigher(), 1);
        assert_eq!(result.paths().len(), 1);
    }

    #[test]
    fn test_weights_prefer_cheaper_longer_path() {
        let graph = bidirectional(&[("A", "B", 10), ("A", "C", 1), ("C", "D", 1), ("D", "B", 1)]);
        let result = DijkstraSearch.search(&graph, &"A", Some(&"B"), &weigher(), ALL_PATHS);
        assert_eq!(result.paths().len(), 1);
        assert_eq!(hops(&result.paths()[0]), vec!["A", "C", "D", "B"]);
        assert_eq!(result.costs()[&"B"], Weight::new(3.0));
    }

    #[test]
    fn test_non_viable_edges_are_skipped() {
        let graph = bidirectional(&[("A", "B", 1), ("B", "C", 1)]);
        let weigher = |e: &TestEdge| {
            if e.src == "B" && e.dst == "C" {
                Weight::NON_VIABLE
            } else {
                Weight::new(1.0)
            }
        };
        let result = DijkstraSearch.search(&graph, &"A", Some(&"C"), &weigher, ALL_PATHS);
        assert!(result.paths().is_empty());
    }

    #[test]
    fn test_missing_endpoint_is_empty() {
        let graph = bidirectional(&[("A", "B", 1)]);
        assert!(DijkstraSearch
            .search(&graph, &"X", Some(&"B"), &weigher(), ALL_PATHS)
            .paths()
            .is_empty());
        assert!(DijkstraSearch
            .search(&graph, &"A", Some(&"X"), &weigher(), ALL_PATHS)
            .paths()
            .is_empty());
    }
}
