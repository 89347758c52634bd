//! Node runtime: one actor task owns the `Router`, everything else talks to
//! it through a `NodeHandle`.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::algorithms::{self, AlgorithmKind};
use crate::config::NodeConfig;
use crate::error::{Result, RoutingError};
use crate::message::{Body, Message, Packet, SelfIntroduction};
use crate::neighbor::{LinkId, NeighborLink};
use crate::router::{Delivery, Router};
use crate::routing_table::RouteTable;
use crate::transport::{Connection, LinkEvent, spawn_link};
use crate::{Cost, NodeName};

const DELIVERY_BACKLOG: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct NeighborInfo {
    pub name: NodeName,
    pub cost: Cost,
    pub connected_at: DateTime<Utc>,
}

/// Point-in-time view of a node, for the shell and for tests.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub name: NodeName,
    pub algorithm: AlgorithmKind,
    pub neighbors: Vec<NeighborInfo>,
    pub coordinator: Option<NodeName>,
    /// Every node this one knows of, itself included
    pub nodes: Vec<NodeName>,
    pub routes: Arc<RouteTable>,
}

enum Command {
    Send {
        destination: NodeName,
        data: String,
        reply: oneshot::Sender<Result<()>>,
    },
    SetEdgeCost {
        neighbor: NodeName,
        cost: Cost,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<NodeSnapshot>,
    },
    Shutdown,
}

enum NodeEvent {
    Link(LinkEvent),
    /// Inbound connection that introduced itself
    Introduced {
        connection: Connection,
        introduction: SelfIntroduction,
    },
    /// Outbound connection the peer accepted
    Established {
        connection: Connection,
        name: NodeName,
        cost: Cost,
        uplink: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    Command(Command),
}

impl From<LinkEvent> for NodeEvent {
    fn from(event: LinkEvent) -> Self {
        NodeEvent::Link(event)
    }
}

pub struct Node {
    router: Router,
    events: mpsc::UnboundedReceiver<NodeEvent>,
    sender: mpsc::UnboundedSender<NodeEvent>,
    next_link: LinkId,
    listener: JoinHandle<()>,
}

impl Node {
    /// Bind the listener and start the node. Failing to bind is the only
    /// fatal error.
    pub async fn spawn(mut config: NodeConfig) -> Result<NodeHandle> {
        let name = config.resolve_name();
        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .await
            .map_err(|source| RoutingError::ListenBind {
                port: config.port,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("Node {} listening on {}", name, local_addr);

        let (sender, events) = mpsc::unbounded_channel();
        let (deliveries, _) = broadcast::channel(DELIVERY_BACKLOG);
        let router = Router::new(name.clone(), algorithms::build(&config), deliveries.clone());
        let listener = tokio::spawn(accept_loop(listener, sender.clone(), config.connect_timeout()));

        let node = Node {
            router,
            events,
            sender: sender.clone(),
            next_link: 0,
            listener,
        };
        tokio::spawn(node.run());

        Ok(NodeHandle {
            name,
            algorithm: config.algorithm,
            local_addr,
            timeout: config.connect_timeout(),
            events: sender,
            deliveries,
        })
    }

    async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            match event {
                NodeEvent::Link(LinkEvent::Frame(link, message)) => self.router.handle_frame(link, message),
                NodeEvent::Link(LinkEvent::Closed(link)) => self.router.handle_closed(link),
                NodeEvent::Introduced {
                    connection,
                    introduction,
                } => self.admit(connection, introduction),
                NodeEvent::Established {
                    connection,
                    name,
                    cost,
                    uplink,
                    reply,
                } => {
                    let _ = reply.send(self.establish(connection, name, cost, uplink));
                }
                NodeEvent::Command(Command::Shutdown) => break,
                NodeEvent::Command(command) => self.execute(command),
            }
        }

        self.listener.abort();
        info!("Node {} stopped", self.router.name());
    }

    fn next_link_id(&mut self) -> LinkId {
        self.next_link += 1;
        self.next_link
    }

    fn admit(&mut self, mut connection: Connection, introduction: SelfIntroduction) {
        if let Err(reason) = self.router.admit(&introduction) {
            warn!("Refusing {} from {}: {}", introduction.name, connection.peer_addr(), reason);
            let refusal = Message::refuse(self.router.name(), reason);
            tokio::spawn(async move {
                if let Err(e) = connection.send(&refusal).await {
                    debug!("Could not deliver refusal: {}", e);
                }
            });
            return;
        }

        let id = self.next_link_id();
        let outbox = spawn_link(id, connection, self.sender.clone());
        if outbox.send(Message::accept(self.router.name())).is_err() {
            debug!("Link {} closed before accepting", id);
        }
        self.router
            .attach(NeighborLink::new(id, introduction.name, introduction.edge_cost, outbox));
    }

    fn establish(&mut self, connection: Connection, name: NodeName, cost: Cost, uplink: bool) -> Result<()> {
        // The peer may have connected to us while our own attempt was in flight
        if name == self.router.name() || self.router.is_connected(&name) {
            return Err(RoutingError::HandshakeRejected(format!("{} is already connected", name)));
        }

        let id = self.next_link_id();
        let link = NeighborLink::new(id, name, cost, spawn_link(id, connection, self.sender.clone()));
        if uplink {
            self.router.attach_uplink(link);
        } else {
            self.router.attach(link);
        }
        Ok(())
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Send {
                destination,
                data,
                reply,
            } => {
                let _ = reply.send(self.router.forward(&destination, Packet::text(data)));
            }
            Command::SetEdgeCost { neighbor, cost, reply } => {
                let _ = reply.send(self.router.set_edge_cost(&neighbor, cost));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.router.snapshot());
            }
            Command::Shutdown => {}
        }
    }
}

async fn accept_loop(listener: TcpListener, events: mpsc::UnboundedSender<NodeEvent>, timeout: Duration) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("Incoming connection from {}", addr);
                let events = events.clone();
                tokio::spawn(async move {
                    if let Err(e) = read_introduction(stream, events, timeout).await {
                        warn!("Dropping connection from {}: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn read_introduction(stream: TcpStream, events: mpsc::UnboundedSender<NodeEvent>, timeout: Duration) -> Result<()> {
    let mut connection = Connection::new(stream)?;
    let message = connection
        .recv_within(timeout)
        .await?
        .ok_or_else(|| RoutingError::Protocol("closed before introducing itself".into()))?;

    let kind = message.kind();
    let Body::SelfIntroduction(introduction) = message.body else {
        return Err(RoutingError::Protocol(format!("expected SELF_INTRODUCTION, got {}", kind)));
    };

    events
        .send(NodeEvent::Introduced {
            connection,
            introduction,
        })
        .map_err(|_| RoutingError::NodeStopped)
}

async fn handshake(addr: &str, introduction: &Message, timeout: Duration) -> Result<(Connection, NodeName)> {
    let mut connection = Connection::connect(addr, timeout).await?;
    connection.send(introduction).await?;

    let reply = connection.recv().await?;
    match reply.map(|message| message.body) {
        Some(Body::ConnectionAccept { name }) => Ok((connection, name)),
        Some(Body::ConnectionRefuse { reason }) => Err(RoutingError::HandshakeRejected(reason)),
        Some(_) => Err(RoutingError::Protocol("expected CONNECTION_ACCEPT or CONNECTION_REFUSE".into())),
        None => Err(RoutingError::Protocol("connection closed during handshake".into())),
    }
}

/// Cloneable front end of a running node.
#[derive(Clone)]
pub struct NodeHandle {
    name: NodeName,
    algorithm: AlgorithmKind,
    local_addr: SocketAddr,
    timeout: Duration,
    events: mpsc::UnboundedSender<NodeEvent>,
    deliveries: broadcast::Sender<Delivery>,
}

impl NodeHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn algorithm(&self) -> AlgorithmKind {
        self.algorithm
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Packets delivered to this node from now on.
    pub fn deliveries(&self) -> broadcast::Receiver<Delivery> {
        self.deliveries.subscribe()
    }

    /// Open a neighbor link with the given edge cost. Returns the peer's name.
    pub async fn connect(&self, host: &str, port: u16, cost: Cost) -> Result<NodeName> {
        self.open(&format!("{}:{}", host, port), cost, false).await
    }

    /// Join the coordinator of a centralized overlay.
    pub async fn attach_coordinator(&self, addr: &str) -> Result<NodeName> {
        self.open(addr, 0, true).await
    }

    async fn open(&self, addr: &str, cost: Cost, uplink: bool) -> Result<NodeName> {
        let introduction = Message::introduce(&self.name, self.algorithm.as_str(), cost);
        let (connection, name) = tokio::time::timeout(self.timeout, handshake(addr, &introduction, self.timeout))
            .await
            .map_err(|_| RoutingError::ConnectTimeout(addr.to_string()))??;

        let (reply, result) = oneshot::channel();
        self.submit(NodeEvent::Established {
            connection,
            name: name.clone(),
            cost,
            uplink,
            reply,
        })?;
        result.await.map_err(|_| RoutingError::NodeStopped)??;
        Ok(name)
    }

    pub async fn send(&self, destination: &str, data: &str) -> Result<()> {
        self.request(|reply| Command::Send {
            destination: destination.to_string(),
            data: data.to_string(),
            reply,
        })
        .await?
    }

    pub async fn set_edge_cost(&self, neighbor: &str, cost: Cost) -> Result<()> {
        self.request(|reply| Command::SetEdgeCost {
            neighbor: neighbor.to_string(),
            cost,
            reply,
        })
        .await?
    }

    pub async fn snapshot(&self) -> Result<NodeSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub fn shutdown(&self) {
        if self.submit(NodeEvent::Command(Command::Shutdown)).is_err() {
            debug!("Node {} already stopped", self.name);
        }
    }

    fn submit(&self, event: NodeEvent) -> Result<()> {
        self.events.send(event).map_err(|_| RoutingError::NodeStopped)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, result) = oneshot::channel();
        self.submit(NodeEvent::Command(command(reply)))?;
        result.await.map_err(|_| RoutingError::NodeStopped)
    }
}
