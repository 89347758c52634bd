use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::routing_table::Route;
use crate::{Cost, NodeName};

/// Envelope exchanged between nodes, one per line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub header: Header,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub from: NodeName,
    /// `None` for neighbor-to-neighbor traffic and floods
    pub to: Option<NodeName>,
    /// Every node the message went through, originator first
    pub path: Vec<NodeName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Body {
    SelfIntroduction(SelfIntroduction),
    ConnectionAccept { name: NodeName },
    ConnectionRefuse { reason: String },
    LinkState { rows: LinkStateRows },
    DistanceVector { vector: DistanceVector },
    EdgeLengthChanged { length: Cost },
    RouteUpdate { table: BTreeMap<NodeName, Route> },
    PacketForwarding(Packet),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfIntroduction {
    pub name: NodeName,
    pub algorithm: String,
    pub edge_cost: Cost,
}

/// A node's advertised neighbor costs, stamped by its owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStateRow {
    pub version: u64,
    pub links: BTreeMap<NodeName, Cost>,
}

pub type LinkStateRows = BTreeMap<NodeName, LinkStateRow>;

pub type DistanceVector = BTreeMap<NodeName, Distance>;

/// Reported distance. Unreachability is explicit so a zero-cost edge stays a
/// real route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    Finite(Cost),
    Unreachable,
}

impl Distance {
    pub fn finite(self) -> Option<Cost> {
        match self {
            Distance::Finite(cost) => Some(cost),
            Distance::Unreachable => None,
        }
    }

    pub fn is_reachable(self) -> bool {
        matches!(self, Distance::Finite(_))
    }

    pub fn plus(self, cost: Cost) -> Distance {
        match self {
            Distance::Finite(d) => d
                .checked_add(cost)
                .map_or(Distance::Unreachable, Distance::Finite),
            Distance::Unreachable => Distance::Unreachable,
        }
    }
}

/// User data relayed hop by hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub id: Uuid,
    pub inner_type: String,
    pub inner_payload: serde_json::Value,
}

impl Packet {
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            inner_type: "TEXT".to_string(),
            inner_payload: serde_json::Value::String(data.into()),
        }
    }
}

impl Message {
    pub fn new(from: &str, to: Option<NodeName>, body: Body) -> Self {
        Self {
            header: Header {
                from: from.to_string(),
                to,
                path: vec![from.to_string()],
            },
            body,
        }
    }

    pub fn introduce(name: &str, algorithm: &str, edge_cost: Cost) -> Self {
        Self::new(
            name,
            None,
            Body::SelfIntroduction(SelfIntroduction {
                name: name.to_string(),
                algorithm: algorithm.to_string(),
                edge_cost,
            }),
        )
    }

    pub fn accept(name: &str) -> Self {
        Self::new(name, None, Body::ConnectionAccept { name: name.to_string() })
    }

    pub fn refuse(name: &str, reason: String) -> Self {
        Self::new(name, None, Body::ConnectionRefuse { reason })
    }

    /// Stamp the receiving node onto the path. Returns `true` when the node
    /// was already on it, i.e. the message went round a loop.
    pub fn arrive(&mut self, local: &str) -> bool {
        let looped = self.header.path.iter().any(|hop| hop == local);
        self.header.path.push(local.to_string());
        looped
    }

    pub fn kind(&self) -> &'static str {
        match self.body {
            Body::SelfIntroduction(_) => "SELF_INTRODUCTION",
            Body::ConnectionAccept { .. } => "CONNECTION_ACCEPT",
            Body::ConnectionRefuse { .. } => "CONNECTION_REFUSE",
            Body::LinkState { .. } => "LINK_STATE",
            Body::DistanceVector { .. } => "DISTANCE_VECTOR",
            Body::EdgeLengthChanged { .. } => "EDGE_LENGTH_CHANGED",
            Body::RouteUpdate { .. } => "ROUTE_UPDATE",
            Body::PacketForwarding(_) => "PACKET_FORWARDING",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_is_tagged_by_type() {
        let msg = Message::introduce("A", "LinkState", 3);
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();

        assert_eq!(json["body"]["type"], "SELF_INTRODUCTION");
        assert_eq!(json["body"]["content"]["edge_cost"], 3);
        assert_eq!(json["header"]["path"], serde_json::json!(["A"]));
    }

    #[test]
    fn test_zero_distance_is_not_unreachable() {
        let mut vector = DistanceVector::new();
        vector.insert("B".to_string(), Distance::Finite(0));
        vector.insert("C".to_string(), Distance::Unreachable);

        let body = Body::DistanceVector { vector };
        let decoded: Body = serde_json::from_str(&serde_json::to_string(&body).unwrap()).unwrap();
        let Body::DistanceVector { vector } = decoded else {
            panic!("wrong body");
        };

        assert_eq!(vector["B"], Distance::Finite(0));
        assert!(vector["B"].is_reachable());
        assert!(!vector["C"].is_reachable());
    }

    #[test]
    fn test_distance_ordering_and_overflow() {
        assert!(Distance::Finite(u32::MAX) < Distance::Unreachable);
        assert_eq!(Distance::Finite(u32::MAX).plus(1), Distance::Unreachable);
        assert_eq!(Distance::Finite(2).plus(3), Distance::Finite(5));
        assert_eq!(Distance::Unreachable.plus(0), Distance::Unreachable);
    }

    #[test]
    fn test_arrive_detects_loops() {
        let mut msg = Message::new("A", None, Body::EdgeLengthChanged { length: 1 });
        assert!(!msg.arrive("B"));
        assert_eq!(msg.header.path, vec!["A", "B"]);
        assert!(msg.arrive("A"));
    }
}
