//! Property-based checks of path queries against a plain BFS reference

mod common;

use common::{device, link};
use proptest::prelude::*;
use sdnet_core::topology::{GraphDescription, PathSettings, Topology};
use sdnet_core::types::{DeviceId, Link};
use std::collections::{BTreeSet, HashMap, VecDeque};

const MAX_DEVICES: usize = 6;

fn name(i: usize) -> String {
    format!("d{}", i)
}

fn graph_strategy() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (2..=MAX_DEVICES).prop_flat_map(|n| {
        let edges = prop::collection::vec((0..n, 0..n), 0..(n * 3))
            .prop_map(|pairs| pairs.into_iter().filter(|(a, b)| a != b).collect());
        (Just(n), edges)
    })
}

fn build(n: usize, edges: &[(usize, usize)]) -> (Topology, Vec<Link>) {
    let links: Vec<Link> = edges.iter().map(|(a, b)| link(&name(*a), &name(*b))).collect();
    let description = GraphDescription::new(1, (0..n).map(|i| device(&name(i))), links.clone());
    (Topology::build(&description, PathSettings::default()), links)
}

/// Hop distance over directed links, `None` when unreachable
fn reference_distance(links: &[Link], src: &DeviceId, dst: &DeviceId) -> Option<usize> {
    let mut adjacency: HashMap<&DeviceId, Vec<&DeviceId>> = HashMap::new();
    for l in links {
        adjacency.entry(&l.src.device_id).or_default().push(&l.dst.device_id);
    }
    let mut seen = BTreeSet::from([src]);
    let mut queue = VecDeque::from([(src, 0usize)]);
    while let Some((at, hops)) = queue.pop_front() {
        if at == dst {
            return Some(hops);
        }
        for next in adjacency.get(at).into_iter().flatten() {
            if seen.insert(*next) {
                queue.push_back((*next, hops + 1));
            }
        }
    }
    None
}

fn is_simple_chain(links: &[Link], src: &DeviceId, dst: &DeviceId) -> bool {
    let Some(first) = links.first() else {
        return false;
    };
    let chained = links
        .windows(2)
        .all(|w| w[0].dst.device_id == w[1].src.device_id);
    let mut visited = BTreeSet::from([&first.src.device_id]);
    let loopless = links.iter().all(|l| visited.insert(&l.dst.device_id));
    chained
        && loopless
        && &first.src.device_id == src
        && links.last().map(|l| &l.dst.device_id) == Some(dst)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn shortest_paths_match_bfs((n, edges) in graph_strategy(), s in 0..MAX_DEVICES, d in 0..MAX_DEVICES) {
        prop_assume!(s < n && d < n && s != d);
        let (topology, links) = build(n, &edges);
        let (src, dst) = (device(&name(s)), device(&name(d)));

        let paths = topology.get_paths(&src, &dst);
        match reference_distance(&links, &src, &dst) {
            None => prop_assert!(paths.is_empty()),
            Some(hops) => {
                prop_assert!(!paths.is_empty());
                for path in &paths {
                    prop_assert_eq!(path.hop_count(), hops);
                    prop_assert_eq!(path.cost.value(), hops as f64);
                    prop_assert!(is_simple_chain(&path.links, &src, &dst));
                }
            }
        }

        // same snapshot, same answer
        prop_assert_eq!(topology.get_paths(&src, &dst), paths);
    }

    #[test]
    fn disjoint_pairs_share_no_links((n, edges) in graph_strategy(), s in 0..MAX_DEVICES, d in 0..MAX_DEVICES) {
        prop_assume!(s < n && d < n && s != d);
        let (topology, _) = build(n, &edges);
        let (src, dst) = (device(&name(s)), device(&name(d)));

        for pair in topology.get_disjoint_paths(&src, &dst) {
            let backup = pair.backup.as_ref();
            prop_assert!(backup.is_some());
            if let Some(backup) = backup {
                prop_assert!(!pair.primary.shares_link_with(backup));
                prop_assert!(is_simple_chain(&backup.links, &src, &dst));
            }
            prop_assert!(is_simple_chain(&pair.primary.links, &src, &dst));
        }
    }

    #[test]
    fn k_shortest_paths_are_ordered((n, edges) in graph_strategy(), s in 0..MAX_DEVICES, d in 0..MAX_DEVICES) {
        prop_assume!(s < n && d < n && s != d);
        let (topology, links) = build(n, &edges);
        let (src, dst) = (device(&name(s)), device(&name(d)));

        let paths = topology.get_k_shortest_paths(&src, &dst, 4);
        prop_assert!(paths.len() <= 4);
        prop_assert!(paths.windows(2).all(|w| w[0].cost <= w[1].cost));
        if let Some(first) = paths.first() {
            prop_assert_eq!(Some(first.hop_count()), reference_distance(&links, &src, &dst));
        }
        let distinct: BTreeSet<Vec<DeviceId>> = paths.iter().map(|p| p.devices()).collect();
        prop_assert_eq!(distinct.len(), paths.len());
    }
}
