//! Newline-delimited JSON framing over TCP.

use log::{debug, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use crate::error::{Result, RoutingError};
use crate::message::Message;
use crate::neighbor::LinkId;

/// One TCP connection carrying `Message` frames.
#[derive(Debug)]
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer_addr: SocketAddr,
    line: String,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            peer_addr,
            line: String::new(),
        })
    }

    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RoutingError::ConnectTimeout(addr.to_string()))??;
        Self::new(stream)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let mut frame = message.encode()?;
        frame.push('\n');
        self.writer.write_all(frame.as_bytes()).await?;
        Ok(())
    }

    /// Next frame, or `None` once the peer closed its side.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }
            let frame = self.line.trim();
            if frame.is_empty() {
                continue;
            }
            return Ok(Some(Message::decode(frame)?));
        }
    }

    /// `recv` bounded by `timeout`.
    pub async fn recv_within(&mut self, timeout: Duration) -> Result<Option<Message>> {
        let peer = self.peer_addr;
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| RoutingError::Protocol(format!("{} sent nothing within {:?}", peer, timeout)))?
    }
}

/// What a link's reader task reports back to the node.
#[derive(Debug)]
pub enum LinkEvent {
    Frame(LinkId, Message),
    Closed(LinkId),
}

/// Hand an established connection over to a reader and a writer task.
/// Returns the link's outbox; dropping every copy of it closes our side.
pub fn spawn_link<E>(id: LinkId, connection: Connection, events: mpsc::UnboundedSender<E>) -> mpsc::UnboundedSender<Message>
where
    E: From<LinkEvent> + Send + 'static,
{
    let Connection {
        reader,
        mut writer,
        peer_addr,
        ..
    } = connection;
    let (outbox, mut queue) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            let mut frame = match message.encode() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Cannot encode {}: {}", message.kind(), e);
                    continue;
                }
            };
            frame.push('\n');
            if let Err(e) = writer.write_all(frame.as_bytes()).await {
                debug!("Link {} to {} write failed: {}", id, peer_addr, e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match Message::decode(&line) {
                    Ok(message) => {
                        if events.send(LinkEvent::Frame(id, message).into()).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Malformed frame on link {} from {}: {}", id, peer_addr, e),
                },
                Ok(None) => {
                    debug!("Link {} to {} closed by peer", id, peer_addr);
                    let _ = events.send(LinkEvent::Closed(id).into());
                    break;
                }
                Err(e) => {
                    debug!("Link {} to {} failed: {}", id, peer_addr, e);
                    let _ = events.send(LinkEvent::Closed(id).into());
                    break;
                }
            }
        }
    });

    outbox
}
