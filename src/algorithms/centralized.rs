//! Centralized link-state routing.
//!
//! Members report their direct edges to a single coordinator and install
//! whatever table it pushes back. The coordinator keeps every member's
//! vector and, for each destination, runs Dijkstra toward it.

use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::dijkstra::{self, Graph};
use super::{Algorithm, AlgorithmKind, TopologyEvent, publish};
use crate::message::{Body, LinkStateRow, LinkStateRows, Message};
use crate::neighbor::Overlay;
use crate::routing_table::RouteTable;
use crate::{Cost, NodeName};

/// Route computation side. Every inbound connection is a member session.
#[derive(Debug, Default)]
pub struct Coordinator {
    local: NodeName,
    vectors: Graph,
    pushed: BTreeMap<NodeName, RouteTable>,
    route: Arc<RouteTable>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vectors(&self) -> &Graph {
        &self.vectors
    }

    fn store_vector(&mut self, node: &str, links: BTreeMap<NodeName, Cost>) -> bool {
        if self.vectors.get(node) == Some(&links) {
            debug!("Vector from {} unchanged", node);
            return false;
        }
        info!("Stored vector from {}: {:?}", node, links);
        self.vectors.insert(node.to_string(), links);
        true
    }

    /// Purge nodes that no remaining vector lists as a neighbor.
    fn collect_garbage(&mut self) -> Vec<NodeName> {
        let orphans: Vec<NodeName> = self
            .vectors
            .keys()
            .filter(|node| **node != self.local)
            .filter(|node| {
                !self
                    .vectors
                    .iter()
                    .any(|(owner, links)| owner != *node && links.contains_key(*node))
            })
            .cloned()
            .collect();

        for node in &orphans {
            self.vectors.remove(node);
        }
        if !orphans.is_empty() {
            info!("Purged unreferenced nodes {:?}", orphans);
        }
        orphans
    }

    /// Table of every source node. Each destination gets its own shortest
    /// path tree over the reversed graph, so the tree routes everyone toward
    /// it; a source's parent in that tree is its next hop.
    pub fn compute_tables(&self) -> BTreeMap<NodeName, RouteTable> {
        let reversed = dijkstra::reverse(&self.vectors);
        let mut tables: BTreeMap<NodeName, RouteTable> = self
            .vectors
            .keys()
            .map(|node| (node.clone(), RouteTable::new()))
            .collect();

        for destination in self.vectors.keys() {
            for (source, path) in dijkstra::calculate_shortest_paths(&reversed, destination) {
                tables
                    .entry(source)
                    .or_default()
                    .add_route(destination.clone(), path.cost, path.predecessor);
            }
        }

        tables
    }

    fn push_tables(&mut self, overlay: &Overlay) {
        let mut tables = self.compute_tables();

        for member in overlay.neighbor_names() {
            let table = tables.remove(member).unwrap_or_default();
            if self.pushed.get(member) == Some(&table) {
                continue;
            }

            debug!("Pushing {} routes to {}", table.len(), member);
            let message = Message::new(
                &self.local,
                Some(member.clone()),
                Body::RouteUpdate {
                    table: (&table).into(),
                },
            );
            if overlay.send_to(member, message) {
                self.pushed.insert(member.clone(), table);
            }
        }
    }

    fn on_vector(&mut self, sender: NodeName, mut rows: LinkStateRows, overlay: &Overlay) {
        let Some(row) = rows.remove(&sender) else {
            warn!("Link state from {} does not carry its own vector", sender);
            return;
        };
        if self.store_vector(&sender, row.links) {
            self.push_tables(overlay);
        }
    }

    fn on_session_closed(&mut self, member: NodeName, overlay: &Overlay) {
        info!("Member {} left", member);
        self.pushed.remove(&member);
        self.vectors.remove(&member);
        self.collect_garbage();
        self.push_tables(overlay);
    }
}

impl Algorithm for Coordinator {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::CentralizedLinkState
    }

    fn init(&mut self, overlay: &Overlay) {
        self.local = overlay.local_name().to_string();
        info!("{} is the routing coordinator", self.local);
    }

    fn handle(&mut self, event: TopologyEvent, overlay: &Overlay) {
        match event {
            TopologyEvent::NeighborUp { name, .. } => {
                info!("Member {} joined", name);
                self.pushed.remove(&name);
            }
            TopologyEvent::NeighborGone { name } => self.on_session_closed(name, overlay),
            TopologyEvent::LinkState { sender, rows, .. } => self.on_vector(sender, rows, overlay),
            other => debug!("Coordinator ignores {:?}", other),
        }
    }

    fn route(&self) -> Arc<RouteTable> {
        self.route.clone()
    }
}

/// Ordinary node: reports its edges upstream, computes nothing itself.
#[derive(Debug, Default)]
pub struct CentralizedMember {
    local: NodeName,
    version: u64,
    route: Arc<RouteTable>,
}

impl CentralizedMember {
    pub fn new() -> Self {
        Self::default()
    }

    fn report_vector(&mut self, overlay: &Overlay) {
        let Some(coordinator) = overlay.uplink().map(|link| link.name.clone()) else {
            return;
        };

        self.version += 1;
        let mut rows = LinkStateRows::new();
        rows.insert(
            self.local.clone(),
            LinkStateRow {
                version: self.version,
                links: overlay.edge_costs(),
            },
        );
        overlay.send_uplink(Message::new(&self.local, Some(coordinator), Body::LinkState { rows }));
    }

    fn prune(&mut self, neighbor: &str, overlay: &Overlay) {
        let mut table = (*self.route).clone();
        if table.remove_routes_via(neighbor) > 0 {
            publish(&mut self.route, table, overlay);
        }
    }

    fn install(&mut self, sender: &str, table: RouteTable, overlay: &Overlay) {
        if overlay.uplink().map(|link| link.name.as_str()) != Some(sender) {
            warn!("Ignoring route update from {} which is not our coordinator", sender);
            return;
        }
        publish(&mut self.route, table, overlay);
    }
}

impl Algorithm for CentralizedMember {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::CentralizedLinkState
    }

    fn init(&mut self, overlay: &Overlay) {
        self.local = overlay.local_name().to_string();
    }

    fn handle(&mut self, event: TopologyEvent, overlay: &Overlay) {
        match event {
            TopologyEvent::NeighborUp { .. } | TopologyEvent::EdgeChanged { .. } | TopologyEvent::UplinkUp { .. } => {
                self.report_vector(overlay)
            }
            TopologyEvent::NeighborGone { name } => {
                self.prune(&name, overlay);
                self.report_vector(overlay);
            }
            TopologyEvent::UplinkGone { name } => {
                warn!("Lost coordinator {}, keeping the last table it pushed", name);
            }
            TopologyEvent::RouteUpdate { sender, table } => self.install(&sender, table.into(), overlay),
            other => debug!("Centralized member ignores {:?}", other),
        }
    }

    fn route(&self) -> Arc<RouteTable> {
        self.route.clone()
    }
}
