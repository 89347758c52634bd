//! Distributed link-state routing.
//!
//! Every node floods its full link-state database whenever its own
//! neighborhood changes and re-floods whatever it learns from others. Each
//! node then runs Dijkstra from itself over the rows it holds.

use chrono::Utc;
use log::{debug, info};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::dijkstra::{self, Graph};
use super::{Algorithm, AlgorithmKind, TopologyEvent, publish};
use crate::error::RoutingError;
use crate::message::{Body, Header, LinkStateRow, LinkStateRows, Message};
use crate::neighbor::Overlay;
use crate::routing_table::RouteTable;
use crate::{Cost, NodeName};

#[derive(Debug, Default)]
pub struct LinkStateRouting {
    local: NodeName,
    link_states: LinkStateRows,
    route: Arc<RouteTable>,
}

/// Row versions are millisecond timestamps so a restarted node still
/// outranks what others remember of its previous life.
fn next_version(previous: u64) -> u64 {
    let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
    now.max(previous.saturating_add(1))
}

impl LinkStateRouting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link_states(&self) -> &LinkStateRows {
        &self.link_states
    }

    fn self_row(&mut self) -> &mut LinkStateRow {
        self.link_states.entry(self.local.clone()).or_default()
    }

    fn update_self_row(&mut self, update: impl FnOnce(&mut LinkStateRow) -> bool) -> bool {
        let row = self.self_row();
        if !update(row) {
            return false;
        }
        row.version = next_version(row.version);
        true
    }

    /// Merge advertised rows of other nodes, keeping whichever version is
    /// newer. Returns whether anything was stored.
    fn apply(&mut self, rows: &LinkStateRows) -> bool {
        let mut changed = false;

        for (name, row) in rows.iter().filter(|(name, _)| **name != self.local) {
            match self.link_states.get(name) {
                Some(known) if known.version >= row.version => {}
                _ => {
                    self.link_states.insert(name.clone(), row.clone());
                    changed = true;
                }
            }
        }

        changed
    }

    /// Drop rows no other row references, until none are left to drop. The
    /// local row always stays.
    fn collect_garbage(&mut self) -> Vec<NodeName> {
        let mut removed = Vec::new();

        loop {
            let referenced: BTreeSet<&NodeName> = self
                .link_states
                .iter()
                .flat_map(|(owner, row)| row.links.keys().filter(move |name| *name != owner))
                .collect();

            let orphans: Vec<NodeName> = self
                .link_states
                .keys()
                .filter(|name| **name != self.local && !referenced.contains(name))
                .cloned()
                .collect();

            if orphans.is_empty() {
                break;
            }
            for name in orphans {
                self.link_states.remove(&name);
                removed.push(name);
            }
        }

        if !removed.is_empty() {
            debug!("Forgot unreferenced nodes {:?}", removed);
        }
        removed
    }

    fn compute(&self) -> Result<RouteTable, RoutingError> {
        let Some(own) = self.link_states.get(&self.local) else {
            return Ok(RouteTable::new());
        };

        if let Some(missing) = own.links.keys().find(|name| !self.link_states.contains_key(*name)) {
            return Err(RoutingError::LinkStateUnstable(missing.clone()));
        }

        let graph: Graph = self
            .link_states
            .iter()
            .map(|(name, row)| (name.clone(), row.links.clone()))
            .collect();

        Ok(dijkstra::route_table(&graph, &self.local))
    }

    fn recompute(&mut self, overlay: &Overlay) {
        self.collect_garbage();
        match self.compute() {
            Ok(table) => {
                publish(&mut self.route, table, overlay);
            }
            Err(e) => debug!("Recompute aborted, keeping previous table: {}", e),
        }
    }

    fn advertise(&self, overlay: &Overlay) {
        let message = Message::new(
            &self.local,
            None,
            Body::LinkState {
                rows: self.link_states.clone(),
            },
        );
        overlay.broadcast(&message);
    }

    fn on_neighbor_up(&mut self, name: NodeName, cost: Cost, overlay: &Overlay) {
        self.update_self_row(|row| row.links.insert(name, cost) != Some(cost));
        self.advertise(overlay);
        self.recompute(overlay);
    }

    fn on_neighbor_gone(&mut self, name: NodeName, overlay: &Overlay) {
        self.update_self_row(|row| row.links.remove(&name).is_some());
        self.link_states.remove(&name);
        self.recompute(overlay);
        self.advertise(overlay);
    }

    fn on_edge_changed(&mut self, name: NodeName, cost: Cost, overlay: &Overlay) {
        if !self.update_self_row(|row| row.links.insert(name, cost) != Some(cost)) {
            return;
        }
        self.advertise(overlay);
        self.recompute(overlay);
    }

    fn on_link_state(&mut self, header: Header, looped: bool, rows: LinkStateRows, overlay: &Overlay) {
        if looped {
            debug!("Dropping link state from {} that already went through us", header.from);
            return;
        }

        // Someone remembers a newer row of ours than the one we hold
        let own_version = self.link_states.get(&self.local).map_or(0, |row| row.version);
        if let Some(remembered) = rows
            .get(&self.local)
            .map(|row| row.version)
            .filter(|version| *version > own_version)
        {
            self.self_row().version = next_version(remembered);
            self.advertise(overlay);
        }

        if !self.apply(&rows) {
            debug!("Link state from {} carries nothing new", header.from);
            return;
        }

        // Re-flood the advertisement unmodified to everyone not yet on its path
        let path = header.path.clone();
        let flood = Message {
            header,
            body: Body::LinkState { rows },
        };
        overlay.broadcast_except(&flood, |name| path.iter().any(|hop| hop == name));

        self.recompute(overlay);
    }
}

impl Algorithm for LinkStateRouting {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::LinkState
    }

    fn init(&mut self, overlay: &Overlay) {
        self.local = overlay.local_name().to_string();
        let links = overlay.edge_costs();
        self.update_self_row(|row| {
            row.links = links;
            true
        });
        info!("Link-state routing installed on {}", self.local);
    }

    fn handle(&mut self, event: TopologyEvent, overlay: &Overlay) {
        match event {
            TopologyEvent::NeighborUp { name, cost } => self.on_neighbor_up(name, cost, overlay),
            TopologyEvent::NeighborGone { name } => self.on_neighbor_gone(name, overlay),
            TopologyEvent::EdgeChanged { name, cost } => self.on_edge_changed(name, cost, overlay),
            TopologyEvent::LinkState {
                header, looped, rows, ..
            } => self.on_link_state(header, looped, rows, overlay),
            other => debug!("Link-state routing ignores {:?}", other),
        }
    }

    fn route(&self) -> Arc<RouteTable> {
        self.route.clone()
    }
}
