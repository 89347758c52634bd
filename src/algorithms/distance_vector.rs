//! Distance-vector routing with poison reverse.
//!
//! Neighbors exchange their best known distances; each node picks, per
//! destination, the cheapest of its direct edge and every neighbor's report
//! plus the edge to that neighbor.

use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Algorithm, AlgorithmKind, TopologyEvent};
use crate::message::{Body, Distance, DistanceVector, Message};
use crate::neighbor::Overlay;
use crate::routing_table::{Route, RouteTable};
use crate::{Cost, NodeName};

/// Learned distances at or above this count as unreachable. Direct edges are
/// never capped.
pub const DEFAULT_MAX_DISTANCE: Cost = Cost::MAX;

/// Local distance-vector bookkeeping. `route_info` is a pure function of
/// `edges` and `vectors`.
#[derive(Debug, Clone)]
pub struct DistanceVectorState {
    local: NodeName,
    max_distance: Cost,
    edges: BTreeMap<NodeName, Cost>,
    vectors: BTreeMap<NodeName, DistanceVector>,
    route_info: Arc<RouteTable>,
}

impl DistanceVectorState {
    pub fn new(local: NodeName, max_distance: Cost) -> Self {
        Self {
            local,
            max_distance,
            edges: BTreeMap::new(),
            vectors: BTreeMap::new(),
            route_info: Arc::new(RouteTable::new()),
        }
    }

    pub fn route_info(&self) -> Arc<RouteTable> {
        self.route_info.clone()
    }

    /// Set the direct edge to `name`; `Unreachable` removes the edge along
    /// with whatever the neighbor last reported. Returns whether the route
    /// table changed.
    pub fn set_edge(&mut self, name: &str, cost: Distance) -> bool {
        match cost {
            Distance::Finite(cost) => {
                if self.edges.get(name) == Some(&cost) {
                    return false;
                }
                self.edges.insert(name.to_string(), cost);
            }
            Distance::Unreachable => {
                let had_edge = self.edges.remove(name).is_some();
                let had_vector = self.vectors.remove(name).is_some();
                if !had_edge && !had_vector {
                    return false;
                }
            }
        }
        self.recompute()
    }

    /// Store the vector `name` last reported. Returns whether the route
    /// table changed.
    pub fn set_vector(&mut self, name: &str, vector: DistanceVector) -> bool {
        if self.vectors.get(name) == Some(&vector) {
            return false;
        }
        self.vectors.insert(name.to_string(), vector);
        self.recompute()
    }

    /// What we tell `neighbor`: our distances, except infinity for every
    /// destination we reach through `neighbor` itself.
    pub fn create_vector_to(&self, neighbor: &str) -> DistanceVector {
        self.route_info
            .iter()
            .map(|(dest, route)| {
                let distance = if route.next_hop == neighbor {
                    Distance::Unreachable
                } else {
                    Distance::Finite(route.distance)
                };
                (dest.clone(), distance)
            })
            .collect()
    }

    fn offer(&self, best: &mut BTreeMap<NodeName, Route>, dest: &str, distance: Cost, next_hop: &str) {
        if dest == self.local {
            return;
        }
        match best.get(dest) {
            Some(route) if route.distance <= distance => {}
            _ => {
                best.insert(
                    dest.to_string(),
                    Route {
                        distance,
                        next_hop: next_hop.to_string(),
                    },
                );
            }
        }
    }

    fn compute(&self) -> RouteTable {
        let mut best = BTreeMap::new();

        for (neighbor, cost) in &self.edges {
            self.offer(&mut best, neighbor, *cost, neighbor);
        }

        for (neighbor, vector) in &self.vectors {
            let Some(edge) = self.edges.get(neighbor) else {
                continue;
            };
            for (dest, distance) in vector {
                let learned = distance.plus(*edge).finite().filter(|d| *d < self.max_distance);
                if let Some(learned) = learned {
                    self.offer(&mut best, dest, learned, neighbor);
                }
            }
        }

        RouteTable::from(best)
    }

    fn recompute(&mut self) -> bool {
        let table = self.compute();
        if *self.route_info == table {
            return false;
        }
        info!("Routing table updated with {} routes", table.len());
        self.route_info = Arc::new(table);
        true
    }
}

#[derive(Debug)]
pub struct DistanceVectorRouting {
    state: DistanceVectorState,
}

impl DistanceVectorRouting {
    pub fn new(max_distance: Cost) -> Self {
        Self {
            state: DistanceVectorState::new(NodeName::new(), max_distance),
        }
    }

    fn send_vector(&self, neighbor: &str, overlay: &Overlay) {
        let message = Message::new(
            &self.state.local,
            Some(neighbor.to_string()),
            Body::DistanceVector {
                vector: self.state.create_vector_to(neighbor),
            },
        );
        overlay.send_to(neighbor, message);
    }

    /// Each neighbor gets its own poison-reversed copy.
    fn advertise(&self, overlay: &Overlay) {
        for neighbor in overlay.neighbor_names() {
            self.send_vector(neighbor, overlay);
        }
    }
}

impl Algorithm for DistanceVectorRouting {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::DistanceVector
    }

    fn init(&mut self, overlay: &Overlay) {
        self.state.local = overlay.local_name().to_string();
        for (name, cost) in overlay.edge_costs() {
            self.state.set_edge(&name, Distance::Finite(cost));
        }
        info!("Distance-vector routing installed on {}", self.state.local);
    }

    fn handle(&mut self, event: TopologyEvent, overlay: &Overlay) {
        let changed = match event {
            TopologyEvent::NeighborUp { name, cost } => {
                let changed = self.state.set_edge(&name, Distance::Finite(cost));
                if !changed {
                    self.send_vector(&name, overlay);
                }
                changed
            }
            TopologyEvent::NeighborGone { name } => self.state.set_edge(&name, Distance::Unreachable),
            TopologyEvent::EdgeChanged { name, cost } => self.state.set_edge(&name, Distance::Finite(cost)),
            TopologyEvent::DistanceVector { sender, vector } => {
                if !overlay.is_neighbor(&sender) {
                    debug!("Ignoring distance vector from non-neighbor {}", sender);
                    return;
                }
                self.state.set_vector(&sender, vector)
            }
            other => {
                debug!("Distance-vector routing ignores {:?}", other);
                false
            }
        };

        if changed {
            self.advertise(overlay);
        }
    }

    fn route(&self) -> Arc<RouteTable> {
        self.state.route_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbor::test_support::{attach, drain};

    fn vector(entries: &[(&str, Distance)]) -> DistanceVector {
        entries.iter().map(|(n, d)| (n.to_string(), *d)).collect()
    }

    fn hop(state: &DistanceVectorState, dest: &str) -> Option<(Cost, String)> {
        state
            .route_info()
            .get_route(dest)
            .map(|r| (r.distance, r.next_hop.clone()))
    }

    /// min(direct edge, min over neighbors of edge + reported), brute force.
    fn expected(state: &DistanceVectorState, dest: &str) -> Option<Cost> {
        let direct = state.edges.get(dest).copied();
        let via = state.vectors.iter().filter_map(|(n, v)| {
            let edge = *state.edges.get(n)?;
            v.get(dest)?.plus(edge).finite()
        });
        direct.into_iter().chain(via).min()
    }

    fn assert_min_property(state: &DistanceVectorState) {
        let mut dests: Vec<&NodeName> = state.edges.keys().collect();
        dests.extend(state.vectors.values().flat_map(|v| v.keys()));
        for dest in dests.into_iter().filter(|d| **d != state.local) {
            assert_eq!(
                state.route_info().get_route(dest).map(|r| r.distance),
                expected(state, dest),
                "distance to {}",
                dest
            );
        }
    }

    #[test]
    fn test_route_is_minimum_over_edges_and_vectors() {
        let mut state = DistanceVectorState::new("A".into(), DEFAULT_MAX_DISTANCE);
        let f = Distance::Finite;

        let steps: Vec<Box<dyn Fn(&mut DistanceVectorState)>> = vec![
            Box::new(|s| {
                s.set_edge("B", f(1));
            }),
            Box::new(|s| {
                s.set_edge("C", f(5));
            }),
            Box::new(|s| {
                s.set_vector("B", vector(&[("C", f(1)), ("D", f(4))]));
            }),
            Box::new(|s| {
                s.set_vector("C", vector(&[("B", f(1)), ("D", f(1))]));
            }),
            Box::new(|s| {
                s.set_edge("C", f(1));
            }),
            Box::new(|s| {
                s.set_vector("B", vector(&[("C", Distance::Unreachable), ("D", f(0))]));
            }),
            Box::new(|s| {
                s.set_edge("B", Distance::Unreachable);
            }),
        ];

        for step in steps {
            step(&mut state);
            assert_min_property(&state);
        }
    }

    #[test]
    fn test_triangle_routes_through_cheap_neighbor() {
        let mut state = DistanceVectorState::new("A".into(), DEFAULT_MAX_DISTANCE);
        state.set_edge("B", Distance::Finite(1));
        state.set_edge("C", Distance::Finite(5));
        state.set_vector("B", vector(&[("A", Distance::Finite(1)), ("C", Distance::Finite(1))]));
        state.set_vector("C", vector(&[("A", Distance::Unreachable), ("B", Distance::Finite(1))]));

        assert_eq!(hop(&state, "C"), Some((2, "B".into())));
        assert_eq!(hop(&state, "B"), Some((1, "B".into())));
        assert_eq!(hop(&state, "A"), None);
    }

    #[test]
    fn test_poison_reverse_for_every_neighbor() {
        let mut state = DistanceVectorState::new("A".into(), DEFAULT_MAX_DISTANCE);
        state.set_edge("B", Distance::Finite(1));
        state.set_edge("C", Distance::Finite(5));
        state.set_vector("B", vector(&[("C", Distance::Finite(1)), ("D", Distance::Finite(2))]));
        state.set_vector("C", vector(&[("E", Distance::Finite(1))]));

        let table = state.route_info();
        for neighbor in ["B", "C"] {
            let reported = state.create_vector_to(neighbor);
            for (dest, route) in table.iter() {
                if route.next_hop == neighbor {
                    assert_eq!(reported[dest], Distance::Unreachable, "{} via {}", dest, neighbor);
                } else {
                    assert_eq!(reported[dest], Distance::Finite(route.distance));
                }
            }
        }
    }

    #[test]
    fn test_identical_vector_changes_nothing() {
        let mut state = DistanceVectorState::new("A".into(), DEFAULT_MAX_DISTANCE);
        state.set_edge("B", Distance::Finite(1));
        let v = vector(&[("C", Distance::Finite(3))]);

        assert!(state.set_vector("B", v.clone()));
        let before = state.route_info();
        assert!(!state.set_vector("B", v));
        assert!(Arc::ptr_eq(&before, &state.route_info()));
        assert!(!state.set_edge("B", Distance::Finite(1)));
    }

    #[test]
    fn test_neighbor_loss_drops_routes_through_it() {
        let mut state = DistanceVectorState::new("A".into(), DEFAULT_MAX_DISTANCE);
        state.set_edge("B", Distance::Finite(1));
        state.set_edge("C", Distance::Finite(5));
        state.set_vector("B", vector(&[("D", Distance::Finite(1))]));

        assert_eq!(hop(&state, "D"), Some((2, "B".into())));
        assert!(state.set_edge("B", Distance::Unreachable));

        assert_eq!(hop(&state, "D"), None);
        assert_eq!(hop(&state, "B"), None);
        assert!(state.route_info().iter().all(|(_, r)| r.next_hop != "B"));
        // Re-adding the edge must not resurrect the old vector
        state.set_edge("B", Distance::Finite(1));
        assert_eq!(hop(&state, "D"), None);
    }

    #[test]
    fn test_zero_cost_edge_is_a_route() {
        let mut state = DistanceVectorState::new("A".into(), DEFAULT_MAX_DISTANCE);
        assert!(state.set_edge("B", Distance::Finite(0)));
        assert_eq!(hop(&state, "B"), Some((0, "B".into())));
        assert_eq!(state.create_vector_to("C")["B"], Distance::Finite(0));
    }

    #[test]
    fn test_learned_distances_beyond_cap_are_unreachable() {
        let mut state = DistanceVectorState::new("A".into(), 16);
        state.set_edge("B", Distance::Finite(1));
        state.set_vector("B", vector(&[("C", Distance::Finite(14)), ("D", Distance::Finite(15))]));

        assert_eq!(hop(&state, "C"), Some((15, "B".into())));
        assert_eq!(hop(&state, "D"), None);
    }

    #[test]
    fn test_expensive_direct_edge_is_a_route() {
        let mut state = DistanceVectorState::new("A".into(), DEFAULT_MAX_DISTANCE);
        assert!(state.set_edge("B", Distance::Finite(2000)));
        assert_eq!(hop(&state, "B"), Some((2000, "B".into())));

        state.set_vector("B", vector(&[("C", Distance::Finite(3000))]));
        assert_eq!(hop(&state, "C"), Some((5000, "B".into())));

        // A low cap still leaves the direct edge alone
        let mut capped = DistanceVectorState::new("A".into(), 16);
        capped.set_edge("B", Distance::Finite(2000));
        capped.set_vector("B", vector(&[("C", Distance::Finite(1))]));
        assert_eq!(hop(&capped, "B"), Some((2000, "B".into())));
        assert_eq!(hop(&capped, "C"), None);
    }

    #[test]
    fn test_learned_distance_overflow_is_unreachable() {
        let mut state = DistanceVectorState::new("A".into(), DEFAULT_MAX_DISTANCE);
        state.set_edge("B", Distance::Finite(10));
        state.set_vector("B", vector(&[("C", Distance::Finite(Cost::MAX - 5))]));
        assert_eq!(hop(&state, "C"), None);
    }

    #[test]
    fn test_neighbors_get_individual_vectors() {
        let mut overlay = Overlay::new("A".into());
        let mut algo = DistanceVectorRouting::new(DEFAULT_MAX_DISTANCE);
        algo.init(&overlay);

        let mut b = attach(&mut overlay, 1, "B", 1);
        algo.handle(
            TopologyEvent::NeighborUp {
                name: "B".into(),
                cost: 1,
            },
            &overlay,
        );
        let first = drain(&mut b);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].header.to.as_deref(), Some("B"));

        let mut c = attach(&mut overlay, 2, "C", 5);
        algo.handle(
            TopologyEvent::NeighborUp {
                name: "C".into(),
                cost: 5,
            },
            &overlay,
        );
        drain(&mut b);
        drain(&mut c);

        algo.handle(
            TopologyEvent::DistanceVector {
                sender: "B".into(),
                vector: vector(&[("A", Distance::Unreachable), ("C", Distance::Finite(1))]),
            },
            &overlay,
        );
        assert_eq!(algo.route().get_route("C").map(|r| r.distance), Some(2));

        let to_b = drain(&mut b);
        let to_c = drain(&mut c);
        let Body::DistanceVector { vector: for_b } = &to_b[0].body else {
            panic!("expected distance vector");
        };
        let Body::DistanceVector { vector: for_c } = &to_c[0].body else {
            panic!("expected distance vector");
        };
        assert_eq!(for_b["C"], Distance::Unreachable);
        assert_eq!(for_c["C"], Distance::Finite(2));
        assert_eq!(for_c["B"], Distance::Finite(1));
    }

    #[test]
    fn test_vector_from_stranger_is_ignored() {
        let overlay = Overlay::new("A".into());
        let mut algo = DistanceVectorRouting::new(DEFAULT_MAX_DISTANCE);
        algo.init(&overlay);

        algo.handle(
            TopologyEvent::DistanceVector {
                sender: "Z".into(),
                vector: vector(&[("C", Distance::Finite(1))]),
            },
            &overlay,
        );
        assert!(algo.route().is_empty());
    }
}
