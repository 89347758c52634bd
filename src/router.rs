use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::algorithms::{Algorithm, AlgorithmKind, TopologyEvent};
use crate::error::{Result, RoutingError};
use crate::message::{Body, Header, Message, Packet, SelfIntroduction};
use crate::neighbor::{LinkId, NeighborLink, Overlay};
use crate::node::{NeighborInfo, NodeSnapshot};
use crate::routing_table::RouteTable;
use crate::{Cost, NodeName};

/// A packet that reached its destination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delivery {
    pub from: NodeName,
    pub path: Vec<NodeName>,
    pub packet: Packet,
}

/// Synchronous routing core of one node. Owns every link and the installed
/// algorithm; the node actor feeds it one event at a time.
pub struct Router {
    overlay: Overlay,
    algorithm: Box<dyn Algorithm>,
    deliveries: broadcast::Sender<Delivery>,
}

impl Router {
    pub fn new(name: NodeName, mut algorithm: Box<dyn Algorithm>, deliveries: broadcast::Sender<Delivery>) -> Self {
        let overlay = Overlay::new(name);
        algorithm.init(&overlay);
        info!("Router {} running {}", overlay.local_name(), algorithm.kind());

        Self {
            overlay,
            algorithm,
            deliveries,
        }
    }

    pub fn name(&self) -> &str {
        self.overlay.local_name()
    }

    pub fn algorithm(&self) -> AlgorithmKind {
        self.algorithm.kind()
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn route(&self) -> Arc<RouteTable> {
        self.algorithm.route()
    }

    /// True when `name` already has a link to us, as neighbor or coordinator.
    pub fn is_connected(&self, name: &str) -> bool {
        self.overlay.is_neighbor(name) || self.overlay.uplink().is_some_and(|link| link.name == name)
    }

    /// Decide on an inbound introduction. The error is the refusal reason
    /// sent back to the peer.
    pub fn admit(&self, introduction: &SelfIntroduction) -> std::result::Result<(), String> {
        if introduction.name == self.name() {
            return Err(format!("{} is my own name", introduction.name));
        }
        if self.is_connected(&introduction.name) {
            return Err(format!("{} is already connected", introduction.name));
        }
        if introduction.algorithm != self.algorithm().as_str() {
            return Err(format!(
                "algorithm mismatch: {} runs {}, {} runs {}",
                self.name(),
                self.algorithm(),
                introduction.name,
                introduction.algorithm
            ));
        }
        Ok(())
    }

    /// Register an established neighbor link.
    pub fn attach(&mut self, link: NeighborLink) {
        info!("Neighbor {} connected with edge cost {}", link.name, link.cost);
        let event = TopologyEvent::NeighborUp {
            name: link.name.clone(),
            cost: link.cost,
        };
        self.overlay.add_neighbor(link);
        self.algorithm.handle(event, &self.overlay);
    }

    /// Register the link to the routing coordinator.
    pub fn attach_uplink(&mut self, link: NeighborLink) {
        info!("Attached to coordinator {}", link.name);
        let name = link.name.clone();
        if let Some(previous) = self.overlay.set_uplink(link) {
            debug!("Replaced coordinator link {}", previous.id);
        }
        self.algorithm.handle(TopologyEvent::UplinkUp { name }, &self.overlay);
    }

    /// A link's channel closed or failed.
    pub fn handle_closed(&mut self, link: LinkId) {
        if let Some(name) = self.overlay.neighbor_by_link(link).map(|l| l.name.clone()) {
            self.overlay.remove_neighbor(&name);
            info!("Neighbor {} is gone", name);
            self.algorithm.handle(TopologyEvent::NeighborGone { name }, &self.overlay);
        } else if let Some(uplink) = self.overlay.clear_uplink(link) {
            self.algorithm
                .handle(TopologyEvent::UplinkGone { name: uplink.name }, &self.overlay);
        } else {
            debug!("Link {} closed before it was registered", link);
        }
    }

    /// Dispatch one frame received on `link`.
    pub fn handle_frame(&mut self, link: LinkId, mut message: Message) {
        let sender = match self.overlay.neighbor_by_link(link).or(self.overlay.uplink().filter(|l| l.id == link)) {
            Some(l) => l.name.clone(),
            None => {
                debug!("Dropping {} from unregistered link {}", message.kind(), link);
                return;
            }
        };

        let kind = message.kind();
        let looped = message.arrive(self.name());
        debug!("Received {} from {}", kind, sender);
        let Message { header, body } = message;

        match body {
            Body::LinkState { rows } => self.algorithm.handle(
                TopologyEvent::LinkState {
                    sender,
                    header,
                    looped,
                    rows,
                },
                &self.overlay,
            ),
            Body::DistanceVector { vector } => self
                .algorithm
                .handle(TopologyEvent::DistanceVector { sender, vector }, &self.overlay),
            Body::RouteUpdate { table } => self
                .algorithm
                .handle(TopologyEvent::RouteUpdate { sender, table }, &self.overlay),
            Body::EdgeLengthChanged { length } => self.on_edge_length_changed(sender, length),
            Body::PacketForwarding(packet) if looped => {
                warn!("Packet {} went round a loop {:?}, dropping", packet.id, header.path);
            }
            Body::PacketForwarding(packet) => self.relay(header, packet),
            _ => warn!("Protocol violation: {} from {} after the handshake", kind, sender),
        }
    }

    fn on_edge_length_changed(&mut self, sender: NodeName, length: Cost) {
        match self.overlay.set_cost(&sender, length) {
            Some(old) if old != length => {
                info!("{} changed our edge cost from {} to {}", sender, old, length);
                self.algorithm.handle(
                    TopologyEvent::EdgeChanged {
                        name: sender,
                        cost: length,
                    },
                    &self.overlay,
                );
            }
            Some(_) => {}
            None => warn!("Edge change from {} which is not a neighbor", sender),
        }
    }

    /// Change the cost of our edge to `neighbor` on both ends.
    pub fn set_edge_cost(&mut self, neighbor: &str, cost: Cost) -> Result<()> {
        let old = self
            .overlay
            .set_cost(neighbor, cost)
            .ok_or_else(|| RoutingError::UnknownNeighbor(neighbor.to_string()))?;
        if old == cost {
            return Ok(());
        }

        info!("Edge to {} changed from {} to {}", neighbor, old, cost);
        let notice = Message::new(
            self.name(),
            Some(neighbor.to_string()),
            Body::EdgeLengthChanged { length: cost },
        );
        self.overlay.send_to(neighbor, notice);
        self.algorithm.handle(
            TopologyEvent::EdgeChanged {
                name: neighbor.to_string(),
                cost,
            },
            &self.overlay,
        );
        Ok(())
    }

    /// Originate a packet toward `destination`.
    pub fn forward(&self, destination: &str, packet: Packet) -> Result<()> {
        let header = Header {
            from: self.name().to_string(),
            to: Some(destination.to_string()),
            path: vec![self.name().to_string()],
        };
        self.route_packet(header, packet)
    }

    fn relay(&self, header: Header, packet: Packet) {
        if let Err(err) = self.route_packet(header, packet) {
            warn!("Cannot forward packet: {}", err);
        }
    }

    fn route_packet(&self, header: Header, packet: Packet) -> Result<()> {
        let Some(destination) = header.to.clone() else {
            return Err(RoutingError::Protocol(format!("packet {} has no destination", packet.id)));
        };

        if destination == self.name() {
            info!("Delivered packet {} from {}", packet.id, header.from);
            let delivery = Delivery {
                from: header.from,
                path: header.path,
                packet,
            };
            if self.deliveries.send(delivery).is_err() {
                debug!("Nobody is listening for deliveries");
            }
            return Ok(());
        }

        let route = self.route();
        let next_hop = route
            .get_route(&destination)
            .map(|r| r.next_hop.clone())
            .ok_or_else(|| RoutingError::RouteNotFound(destination.clone()))?;

        debug!("Forwarding packet {} to {} via {}", packet.id, destination, next_hop);
        let message = Message {
            header,
            body: Body::PacketForwarding(packet),
        };
        if !self.overlay.send_to(&next_hop, message) {
            return Err(RoutingError::UnknownNeighbor(next_hop));
        }
        Ok(())
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let route = self.route();
        let mut nodes: Vec<NodeName> = std::iter::once(self.name().to_string())
            .chain(self.overlay.neighbor_names().cloned())
            .chain(route.destinations().cloned())
            .collect();
        nodes.sort();
        nodes.dedup();

        NodeSnapshot {
            name: self.name().to_string(),
            algorithm: self.algorithm(),
            neighbors: self
                .overlay
                .get_neighbors()
                .map(|link| NeighborInfo {
                    name: link.name.clone(),
                    cost: link.cost,
                    connected_at: link.connected_at,
                })
                .collect(),
            coordinator: self.overlay.uplink().map(|link| link.name.clone()),
            nodes,
            routes: route,
        }
    }
}
