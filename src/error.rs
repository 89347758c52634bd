//! Routing error types

use thiserror::Error;

use crate::NodeName;

#[derive(Debug, Error)]
pub enum RoutingError {
    /// The peer refused our introduction (duplicate name, algorithm mismatch)
    #[error("connection refused: {0}")]
    HandshakeRejected(String),

    /// No route to the destination in the current table
    #[error("no route to {0}")]
    RouteNotFound(NodeName),

    #[error("{0} is not a neighbor")]
    UnknownNeighbor(NodeName),

    #[error("failed to bind listener on port {port}: {source}")]
    ListenBind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),

    /// A frame arrived that makes no sense at this point of the handshake
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Flooded link state references a node we hold no row for yet
    #[error("link state unstable: no row for {0}")]
    LinkStateUnstable(NodeName),

    #[error("node has stopped")]
    NodeStopped,
}

pub type Result<T> = std::result::Result<T, RoutingError>;
