//! In-process network for tests and local play.
//!
//! Every node gets an unbounded inbox and a pump task that feeds the inbox
//! into its messenger, so delivery behaves like a real transport: ordered per
//! sender and never waiting on the receiving node.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use invokerpc::NodeId;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::MessengerConfig;
use crate::transport;
use crate::transport::Transport;
use crate::unified::UnifiedMessenger;

type Frame = (NodeId, Vec<u8>);

/// A malformed frame one node reported about another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub reporter: NodeId,
    pub offender: NodeId,
    pub reason: String,
}

struct Slot {
    inbox: mpsc::UnboundedSender<Frame>,
    messenger: Option<UnifiedMessenger>,
}

#[derive(Default)]
struct HubShared {
    slots: DashMap<NodeId, Slot>,
    next_id: AtomicU64,
    violations: Mutex<Vec<Violation>>,
    captured: DashMap<NodeId, Vec<Frame>>,
}

/// A set of nodes wired to each other through channels.
#[derive(Clone, Default)]
pub struct MemoryHub {
    shared: Arc<HubShared>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_node(&self) -> NodeId {
        NodeId(self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Adds a node served by a fresh messenger. Needs a tokio runtime.
    pub fn spawn_node(&self, config: MessengerConfig) -> UnifiedMessenger {
        let node = self.next_node();
        let transport = Arc::new(MemoryTransport { node, hub: Arc::downgrade(&self.shared) });
        let messenger = UnifiedMessenger::new(transport, config);

        let (inbox, mut rx) = mpsc::unbounded_channel::<Frame>();
        let pump = messenger.clone();
        tokio::spawn(async move {
            while let Some((from, bytes)) = rx.recv().await {
                pump.on_envelope_received(from, &bytes);
            }
        });

        self.shared.slots.insert(node, Slot { inbox, messenger: Some(messenger.clone()) });
        debug!(%node, "memory node up");
        messenger
    }

    /// Adds a node that accepts frames but never answers them.
    ///
    /// What it receives can be read back with [`MemoryHub::received_by`].
    pub fn add_mute_node(&self) -> NodeId {
        let node = self.next_node();
        let (inbox, mut rx) = mpsc::unbounded_channel::<Frame>();
        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.captured.entry(node).or_default().push(frame);
            }
        });

        self.shared.slots.insert(node, Slot { inbox, messenger: None });
        debug!(%node, "mute memory node up");
        node
    }

    /// Frames delivered to a mute node so far, with their senders.
    pub fn received_by(&self, node: NodeId) -> Vec<(NodeId, Vec<u8>)> {
        self.shared.captured.get(&node).map(|f| f.value().clone()).unwrap_or_default()
    }

    /// Delivers `bytes` to `to` as if `from` had sent them.
    pub fn inject(&self, from: NodeId, to: NodeId, bytes: Vec<u8>) -> bool {
        let Some(inbox) = self.shared.slots.get(&to).map(|s| s.inbox.clone()) else {
            return false;
        };
        inbox.send((from, bytes)).is_ok()
    }

    /// Cuts `node` off. Every remaining node, and `node` itself, is told
    /// the other side is gone.
    pub fn disconnect(&self, node: NodeId) {
        let Some((_, slot)) = self.shared.slots.remove(&node) else {
            return;
        };
        let others: Vec<(NodeId, Option<UnifiedMessenger>)> = self
            .shared
            .slots
            .iter()
            .map(|s| (*s.key(), s.messenger.clone()))
            .collect();

        for (other, messenger) in others {
            if let Some(messenger) = messenger {
                messenger.on_peer_disconnected(node);
            }
            if let Some(messenger) = &slot.messenger {
                messenger.on_peer_disconnected(other);
            }
        }
        debug!(%node, "memory node disconnected");
    }

    /// Malformed frames reported so far.
    pub fn violations(&self) -> Vec<Violation> {
        self.shared.violations.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

struct MemoryTransport {
    node: NodeId,
    hub: Weak<HubShared>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    fn local_node(&self) -> NodeId {
        self.node
    }

    async fn send_to(&self, node: NodeId, payload: Vec<u8>) -> transport::Result<()> {
        let hub = self
            .hub
            .upgrade()
            .ok_or_else(|| transport::Error::ConnectionLost("hub dropped".into()))?;
        if !hub.slots.contains_key(&self.node) {
            return Err(transport::Error::ConnectionLost(format!("{} is disconnected", self.node)));
        }
        let inbox = hub
            .slots
            .get(&node)
            .map(|s| s.inbox.clone())
            .ok_or(transport::Error::UnknownNode(node))?;
        inbox
            .send((self.node, payload))
            .map_err(|_| transport::Error::ConnectionLost(format!("{} inbox closed", node)))
    }

    fn protocol_violation(&self, node: NodeId, reason: &str) {
        if let Some(hub) = self.hub.upgrade() {
            let violation = Violation { reporter: self.node, offender: node, reason: reason.to_string() };
            hub.violations.lock().unwrap_or_else(PoisonError::into_inner).push(violation);
        }
    }
}
