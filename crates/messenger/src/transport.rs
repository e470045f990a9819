//! # Transport Abstraction
//!
//! The messenger's only view of the network.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: the transport moves opaque envelope bytes. It knows
//!   nothing about calls, replies or correlation ids.
//! - **Push Inbound**: incoming bytes and disconnects are pushed into the
//!   messenger (`UnifiedMessenger::on_envelope_received` and
//!   `UnifiedMessenger::on_peer_disconnected`); the transport never waits on it.
//! - **Per-peer Order**: bytes sent to one node arrive in the order sent.

use std::fmt;

use invokerpc::NodeId;

/// Errors that occur at the network layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// No connection to this node exists.
    UnknownNode(NodeId),
    /// Generic I/O or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            Self::UnknownNode(node) => write!(f, "no connection to {}", node),
            Self::Io(msg) => write!(f, "i/o error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Point-to-point and fan-out delivery of envelope bytes.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The node this transport sends from.
    fn local_node(&self) -> NodeId;

    /// Sends `payload` to `node`.
    ///
    /// # invariants
    /// - Must not interpret the payload.
    /// - An `Err` means the node should be considered gone.
    async fn send_to(&self, node: NodeId, payload: Vec<u8>) -> Result<()>;

    /// Sends the same `payload` to every node in `nodes`.
    ///
    /// Returns the nodes that could not be reached. The default sends to each
    /// node in turn and keeps going past failures.
    async fn broadcast_to(&self, nodes: &[NodeId], payload: Vec<u8>) -> Vec<(NodeId, Error)> {
        let mut failed = Vec::new();
        for &node in nodes {
            if let Err(e) = self.send_to(node, payload.clone()).await {
                failed.push((node, e));
            }
        }
        failed
    }

    /// Told when `node` sent bytes that are not a valid envelope.
    fn protocol_violation(&self, _node: NodeId, _reason: &str) {}
}
