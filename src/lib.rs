pub mod algorithms;
pub mod config;
pub mod error;
pub mod message;
pub mod neighbor;
pub mod node;
pub mod router;
pub mod routing_table;
pub mod shell;
pub mod transport;

pub use algorithms::{Algorithm, AlgorithmKind, TopologyEvent};
pub use config::NodeConfig;
pub use error::{Result, RoutingError};
pub use message::{Body, Distance, Header, Message, Packet};
pub use neighbor::{NeighborLink, Overlay};
pub use node::{Node, NodeHandle, NodeSnapshot};
pub use router::{Delivery, Router};
pub use routing_table::{Route, RouteTable};

/// Unique identity of a node in the overlay.
pub type NodeName = String;

/// Non-negative edge cost / path length.
pub type Cost = u32;
