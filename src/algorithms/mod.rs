pub mod centralized;
pub mod dijkstra;
pub mod distance_vector;
pub mod link_state;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::NodeConfig;
use crate::message::{DistanceVector, Header, LinkStateRows};
use crate::neighbor::Overlay;
use crate::routing_table::{Route, RouteTable};
use crate::{Cost, NodeName};

pub use centralized::{CentralizedMember, Coordinator};
pub use distance_vector::DistanceVectorRouting;
pub use link_state::LinkStateRouting;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum AlgorithmKind {
    #[value(name = "link-state")]
    LinkState,
    #[value(name = "centralized-link-state")]
    CentralizedLinkState,
    #[value(name = "distance-vector")]
    DistanceVector,
}

impl AlgorithmKind {
    /// Identity exchanged during the admission handshake.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::LinkState => "LinkState",
            AlgorithmKind::CentralizedLinkState => "CentralizedLinkState",
            AlgorithmKind::DistanceVector => "DistanceVector",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LinkState" => Ok(AlgorithmKind::LinkState),
            "CentralizedLinkState" => Ok(AlgorithmKind::CentralizedLinkState),
            "DistanceVector" => Ok(AlgorithmKind::DistanceVector),
            other => Err(format!("unknown algorithm: {}", other)),
        }
    }
}

/// Topology changes and advertisements the router hands to its algorithm.
#[derive(Debug, Clone)]
pub enum TopologyEvent {
    NeighborUp { name: NodeName, cost: Cost },
    NeighborGone { name: NodeName },
    EdgeChanged { name: NodeName, cost: Cost },
    UplinkUp { name: NodeName },
    UplinkGone { name: NodeName },
    /// `sender` is the neighbor the advertisement arrived from
    LinkState {
        sender: NodeName,
        header: Header,
        looped: bool,
        rows: LinkStateRows,
    },
    DistanceVector {
        sender: NodeName,
        vector: DistanceVector,
    },
    RouteUpdate {
        sender: NodeName,
        table: BTreeMap<NodeName, Route>,
    },
}

/// Routing strategy installed once per node.
pub trait Algorithm: Send {
    fn kind(&self) -> AlgorithmKind;

    /// Called when the router installs the algorithm.
    fn init(&mut self, overlay: &Overlay);

    fn handle(&mut self, event: TopologyEvent, overlay: &Overlay);

    /// Read-only snapshot of the current table.
    fn route(&self) -> Arc<RouteTable>;
}

/// Pick the algorithm variant for this node.
pub fn build(config: &NodeConfig) -> Box<dyn Algorithm> {
    match config.algorithm {
        AlgorithmKind::LinkState => Box::new(LinkStateRouting::new()),
        AlgorithmKind::DistanceVector => Box::new(DistanceVectorRouting::new(config.max_distance)),
        AlgorithmKind::CentralizedLinkState if config.coordinator => Box::new(Coordinator::new()),
        AlgorithmKind::CentralizedLinkState => Box::new(CentralizedMember::new()),
    }
}

/// Swap `candidate` in as the published table. Nothing changes when it names
/// a next hop that is not a live neighbor or equals the current table.
pub(crate) fn publish(current: &mut Arc<RouteTable>, candidate: RouteTable, overlay: &Overlay) -> bool {
    if let Some(hop) = candidate.find_invalid_next_hop(|hop| overlay.is_neighbor(hop)) {
        warn!("Computed route uses {} which is not a neighbor, keeping previous table", hop);
        return false;
    }

    if **current == candidate {
        return false;
    }

    info!("Routing table updated with {} routes", candidate.len());
    *current = Arc::new(candidate);
    true
}
