use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

use crate::message::Message;
use crate::{Cost, NodeName};

/// Identifier of one established connection; a name can be reused by a later
/// connection, an id never is.
pub type LinkId = u64;

/// A live, weighted connection to an adjacent node.
#[derive(Debug, Clone)]
pub struct NeighborLink {
    pub id: LinkId,
    pub name: NodeName,
    pub cost: Cost,
    pub connected_at: DateTime<Utc>,
    outbox: mpsc::UnboundedSender<Message>,
}

impl NeighborLink {
    pub fn new(id: LinkId, name: NodeName, cost: Cost, outbox: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id,
            name,
            cost,
            connected_at: Utc::now(),
            outbox,
        }
    }

    /// Queue a message for the link's writer. Returns `false` once the
    /// channel is gone; the close event follows separately.
    pub fn send(&self, message: Message) -> bool {
        if self.outbox.send(message).is_err() {
            debug!("Link {} to {} already closed", self.id, self.name);
            return false;
        }
        true
    }
}

/// The node's view of its direct connections: neighbor links plus, for
/// centralized members, the uplink to the coordinator.
#[derive(Debug)]
pub struct Overlay {
    local: NodeName,
    neighbors: BTreeMap<NodeName, NeighborLink>,
    uplink: Option<NeighborLink>,
}

impl Overlay {
    pub fn new(local: NodeName) -> Self {
        Self {
            local,
            neighbors: BTreeMap::new(),
            uplink: None,
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    pub fn add_neighbor(&mut self, link: NeighborLink) {
        self.neighbors.insert(link.name.clone(), link);
    }

    pub fn get_neighbor(&self, name: &str) -> Option<&NeighborLink> {
        self.neighbors.get(name)
    }

    pub fn get_neighbors(&self) -> impl Iterator<Item = &NeighborLink> {
        self.neighbors.values()
    }

    pub fn neighbor_names(&self) -> impl Iterator<Item = &NodeName> {
        self.neighbors.keys()
    }

    pub fn is_neighbor(&self, name: &str) -> bool {
        self.neighbors.contains_key(name)
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    /// Current direct edge costs, keyed by neighbor.
    pub fn edge_costs(&self) -> BTreeMap<NodeName, Cost> {
        self.neighbors
            .values()
            .map(|link| (link.name.clone(), link.cost))
            .collect()
    }

    pub fn set_cost(&mut self, name: &str, cost: Cost) -> Option<Cost> {
        self.neighbors.get_mut(name).map(|link| std::mem::replace(&mut link.cost, cost))
    }

    pub fn remove_neighbor(&mut self, name: &str) -> Option<NeighborLink> {
        self.neighbors.remove(name)
    }

    pub fn neighbor_by_link(&self, id: LinkId) -> Option<&NeighborLink> {
        self.neighbors.values().find(|link| link.id == id)
    }

    pub fn send_to(&self, name: &str, message: Message) -> bool {
        match self.neighbors.get(name) {
            Some(link) => link.send(message),
            None => {
                warn!("Cannot send {} to {}: not a neighbor", message.kind(), name);
                false
            }
        }
    }

    pub fn broadcast(&self, message: &Message) {
        self.broadcast_except(message, |_| false);
    }

    pub fn broadcast_except(&self, message: &Message, skip: impl Fn(&str) -> bool) {
        for link in self.neighbors.values().filter(|link| !skip(&link.name)) {
            link.send(message.clone());
        }
    }

    pub fn set_uplink(&mut self, link: NeighborLink) -> Option<NeighborLink> {
        self.uplink.replace(link)
    }

    pub fn uplink(&self) -> Option<&NeighborLink> {
        self.uplink.as_ref()
    }

    pub fn clear_uplink(&mut self, id: LinkId) -> Option<NeighborLink> {
        match &self.uplink {
            Some(link) if link.id == id => self.uplink.take(),
            _ => None,
        }
    }

    pub fn send_uplink(&self, message: Message) -> bool {
        match &self.uplink {
            Some(link) => link.send(message),
            None => {
                debug!("No coordinator attached, dropping {}", message.kind());
                false
            }
        }
    }
}
