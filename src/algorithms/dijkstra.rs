use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use crate::routing_table::RouteTable;
use crate::{Cost, NodeName};

/// Directed adjacency: node -> (neighbor -> cost).
pub type Graph = BTreeMap<NodeName, BTreeMap<NodeName, Cost>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortestPath {
    pub cost: Cost,
    /// Node right after the source on the path
    pub next_hop: NodeName,
    /// Node right before the destination on the path
    pub predecessor: NodeName,
}

#[derive(Debug, PartialEq, Eq)]
struct State {
    cost: Cost,
    router: NodeName,
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap, ties go to the smaller name
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| other.router.cmp(&self.router))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Shortest paths from `source` to every reachable node of `graph`. Only
/// nodes that are keys of `graph` are settled; edges to anything else are
/// ignored.
pub fn calculate_shortest_paths(graph: &Graph, source: &str) -> BTreeMap<NodeName, ShortestPath> {
    let mut distances: BTreeMap<&str, Cost> = BTreeMap::new();
    let mut previous: BTreeMap<&str, &str> = BTreeMap::new();
    let mut heap = BinaryHeap::new();

    distances.insert(source, 0);
    heap.push(State {
        cost: 0,
        router: source.to_string(),
    });

    while let Some(State { cost, router }) = heap.pop() {
        // Skip if we've already found a better path
        if cost > distances.get(router.as_str()).copied().unwrap_or(Cost::MAX) {
            continue;
        }

        let Some((router, links)) = graph.get_key_value(router.as_str()) else {
            continue;
        };

        for (neighbor, link_cost) in links {
            let Some((neighbor, _)) = graph.get_key_value(neighbor.as_str()) else {
                continue;
            };
            let Some(new_cost) = cost.checked_add(*link_cost) else {
                continue;
            };

            if new_cost < distances.get(neighbor.as_str()).copied().unwrap_or(Cost::MAX) {
                distances.insert(neighbor.as_str(), new_cost);
                previous.insert(neighbor.as_str(), router.as_str());
                heap.push(State {
                    cost: new_cost,
                    router: neighbor.clone(),
                });
            }
        }
    }

    distances
        .iter()
        .filter(|(node, _)| **node != source)
        .filter_map(|(&node, cost)| {
            let next_hop = find_next_hop(&previous, source, node)?;
            let predecessor = previous.get(node)?.to_string();
            Some((
                node.to_string(),
                ShortestPath {
                    cost: *cost,
                    next_hop,
                    predecessor,
                },
            ))
        })
        .collect()
}

/// Forward route table of `source`: destination -> {distance, next hop}.
pub fn route_table(graph: &Graph, source: &str) -> RouteTable {
    calculate_shortest_paths(graph, source)
        .into_iter()
        .map(|(dest, path)| {
            (
                dest,
                crate::routing_table::Route {
                    distance: path.cost,
                    next_hop: path.next_hop,
                },
            )
        })
        .collect()
}

/// Same graph with every edge pointing the other way.
pub fn reverse(graph: &Graph) -> Graph {
    let mut reversed: Graph = graph.keys().map(|node| (node.clone(), BTreeMap::new())).collect();
    for (from, links) in graph {
        for (to, cost) in links {
            reversed
                .entry(to.clone())
                .or_default()
                .insert(from.clone(), *cost);
        }
    }
    reversed
}

fn find_next_hop(previous: &BTreeMap<&str, &str>, source: &str, dest: &str) -> Option<NodeName> {
    if dest == source {
        return None;
    }

    let mut current = dest;
    while let Some(prev) = previous.get(current) {
        if *prev == source {
            return Some(current.to_string());
        }
        current = *prev;
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn graph(edges: &[(&str, &str, Cost)]) -> Graph {
        let mut graph = Graph::new();
        for (a, b, cost) in edges {
            graph.entry(a.to_string()).or_default().insert(b.to_string(), *cost);
            graph.entry(b.to_string()).or_default().insert(a.to_string(), *cost);
        }
        graph
    }

    #[test]
    fn test_triangle_prefers_two_cheap_hops() {
        let g = graph(&[("A", "B", 1), ("B", "C", 1), ("A", "C", 5)]);
        let paths = calculate_shortest_paths(&g, "A");

        assert_eq!(paths["C"].cost, 2);
        assert_eq!(paths["C"].next_hop, "B");
        assert_eq!(paths["C"].predecessor, "B");
        assert_eq!(paths["B"].next_hop, "B");
        assert!(!paths.contains_key("A"));
    }

    #[test]
    fn test_disconnected_nodes_are_omitted() {
        let mut g = graph(&[("A", "B", 1), ("C", "D", 1)]);
        g.entry("E".into()).or_default();
        let paths = calculate_shortest_paths(&g, "A");

        assert_eq!(paths.len(), 1);
        assert!(paths.contains_key("B"));
    }

    #[test]
    fn test_edges_to_unknown_nodes_are_ignored() {
        let mut g = Graph::new();
        g.entry("A".into()).or_default().insert("B".into(), 1);
        g.entry("A".into()).or_default().insert("Z".into(), 1);
        g.entry("B".into()).or_default();

        let paths = calculate_shortest_paths(&g, "A");
        assert!(paths.contains_key("B"));
        assert!(!paths.contains_key("Z"));
    }

    #[test]
    fn test_ties_are_deterministic() {
        // Two equal-cost paths A-B-D and A-C-D
        let g = graph(&[("A", "B", 1), ("A", "C", 1), ("B", "D", 1), ("C", "D", 1)]);
        for _ in 0..10 {
            assert_eq!(calculate_shortest_paths(&g, "A")["D"].next_hop, "B");
        }
    }

    #[test]
    fn test_zero_cost_edges() {
        let g = graph(&[("A", "B", 0), ("B", "C", 0)]);
        let table = route_table(&g, "A");
        assert_eq!(table.get_route("C").map(|r| r.distance), Some(0));
        assert_eq!(table.get_route("C").map(|r| r.next_hop.as_str()), Some("B"));
    }

    #[test]
    fn test_reverse_keeps_isolated_nodes() {
        let mut g = Graph::new();
        g.entry("A".into()).or_default().insert("B".into(), 3);
        g.entry("B".into()).or_default();
        g.entry("C".into()).or_default();

        let r = reverse(&g);
        assert_eq!(r["B"]["A"], 3);
        assert!(r["A"].is_empty());
        assert!(r.contains_key("C"));
    }
}
