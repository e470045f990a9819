//! # Unified Messenger
//!
//! One node's end of remote invocation: sending calls (point-to-point or to a
//! broadcast group), gathering their replies, and serving calls that arrive.
//!
//! ## Flow
//!
//! ```text
//!  caller ── post ──► PendingCalls::register ──► Transport::send_to / broadcast_to
//!                                                        │
//!  transport ── on_envelope_received ──┬── Reply ──► PendingCalls::deliver_reply
//!                                      └── Call ───► worker[from] ──► Dispatcher ──► Reply
//! ```
//!
//! Inbound delivery never waits. Calls are queued on a worker per sending
//! node (this node included, for calls to itself) and replies go straight to
//! the pending table. A worker starts its sender's calls in arrival order and
//! lets each finish before starting the next, unless the handler waits on a
//! nested call: then the next call starts at once. Chains such as
//! A → B → A → B, or a local handler calling another local remote, therefore
//! cannot deadlock, at the cost of strict ordering behind such a handler.

use std::fmt;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use dashmap::DashMap;
use invokerpc::CorrelationId;
use invokerpc::Envelope;
use invokerpc::Fault;
use invokerpc::Invoke;
use invokerpc::MethodCall;
use invokerpc::NodeId;
use invokerpc::Outcome;
use invokerpc::Reply;
use invokerpc::Value;
use invokerpc::peek_call_id;
use invokerpc::peek_reply_id;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::config::MessengerConfig;
use crate::dispatch::Dispatcher;
use crate::ids::IdGenerator;
use crate::pending;
use crate::pending::Gathered;
use crate::pending::PendingCalls;
use crate::pending::Waiter;
use crate::registry::RemoteRegistry;
use crate::transport::Transport;

/// What a caller can get back instead of a result.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    /// The replies did not all arrive within the timeout.
    Timeout(CorrelationId),
    /// Too many calls are already waiting for replies.
    TooManyPending(usize),
    /// The messenger went away while the call was outstanding.
    Closed,
    /// The recipient answered with a fault.
    Remote(Fault),
    /// The call could not be put on the wire.
    Protocol(invokerpc::Error),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(id) => write!(f, "call {} timed out", id),
            Self::TooManyPending(max) => write!(f, "too many pending calls (limit {})", max),
            Self::Closed => write!(f, "messenger closed"),
            Self::Remote(fault) => write!(f, "remote fault: {}", fault),
            Self::Protocol(e) => write!(f, "protocol error: {}", e),
        }
    }
}

impl std::error::Error for CallError {}

impl From<pending::Error> for CallError {
    fn from(e: pending::Error) -> Self {
        match e {
            pending::Error::Timeout(id) => Self::Timeout(id),
            pending::Error::TooManyPending(max) => Self::TooManyPending(max),
            pending::Error::Closed => Self::Closed,
        }
    }
}

impl From<invokerpc::Error> for CallError {
    fn from(e: invokerpc::Error) -> Self {
        Self::Protocol(e)
    }
}

pub type Result<T> = std::result::Result<T, CallError>;

/// Who a call is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    PointToPoint(NodeId),
    /// Every node serving the named group when the call is sent.
    Broadcast(String),
}

struct Inner {
    local: NodeId,
    transport: Arc<dyn Transport>,
    config: MessengerConfig,
    registry: Arc<RemoteRegistry>,
    dispatcher: Dispatcher,
    pending: PendingCalls,
    ids: IdGenerator,
    workers: DashMap<NodeId, mpsc::UnboundedSender<Invoke>>,
}

/// Cheap to clone; clones share the same node state.
#[derive(Clone)]
pub struct UnifiedMessenger {
    inner: Arc<Inner>,
}

impl UnifiedMessenger {
    pub fn new(transport: Arc<dyn Transport>, config: MessengerConfig) -> Self {
        let local = transport.local_node();
        let registry = Arc::new(RemoteRegistry::new(local));
        let inner = Inner {
            local,
            transport,
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            pending: PendingCalls::new(config.max_pending),
            ids: IdGenerator::new(),
            workers: DashMap::new(),
            config,
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn node(&self) -> NodeId {
        self.inner.local
    }

    pub fn registry(&self) -> &RemoteRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &MessengerConfig {
        &self.inner.config
    }

    /// Calls `node` and waits for its result.
    pub async fn call(&self, node: NodeId, call: MethodCall) -> Result<Value> {
        self.call_with_timeout(node, call, self.inner.config.call_timeout).await
    }

    pub async fn call_with_timeout(&self, node: NodeId, call: MethodCall, timeout: Duration) -> Result<Value> {
        let waiter = self
            .post(call, Delivery::PointToPoint(node), true)
            .await?
            .ok_or(CallError::Closed)?;
        let mut gathered = waiter.wait(timeout).await?;
        match gathered.remove(&node) {
            Some(outcome) => outcome.into_result().map_err(CallError::Remote),
            None => Err(CallError::Closed),
        }
    }

    /// Calls every member of `group` and gathers one outcome per member.
    ///
    /// A member that disconnects before answering shows up as
    /// [`Fault::RecipientGone`]. An empty group yields an empty map.
    pub async fn broadcast(&self, group: &str, call: MethodCall) -> Result<Gathered> {
        self.broadcast_with_timeout(group, call, self.inner.config.call_timeout).await
    }

    pub async fn broadcast_with_timeout(&self, group: &str, call: MethodCall, timeout: Duration) -> Result<Gathered> {
        let waiter = self
            .post(call, Delivery::Broadcast(group.to_string()), true)
            .await?
            .ok_or(CallError::Closed)?;
        Ok(waiter.wait(timeout).await?)
    }

    /// Fire-and-forget call to `node`.
    pub async fn send(&self, node: NodeId, call: MethodCall) -> Result<()> {
        self.post(call, Delivery::PointToPoint(node), false).await.map(|_| ())
    }

    /// Fire-and-forget call to every member of `group`.
    pub async fn broadcast_one_way(&self, group: &str, call: MethodCall) -> Result<()> {
        self.post(call, Delivery::Broadcast(group.to_string()), false).await.map(|_| ())
    }

    /// Sends `call` and, when `needs_reply`, returns the waiter for its replies.
    ///
    /// The pending entry exists before any byte leaves, and a broadcast
    /// expects exactly the members present at this point. A recipient that
    /// cannot be reached is recorded as gone for this call.
    pub async fn post(&self, call: MethodCall, delivery: Delivery, needs_reply: bool) -> Result<Option<Waiter<'_>>> {
        let inner = &self.inner;
        let mut recipients: Vec<NodeId> = match &delivery {
            Delivery::PointToPoint(node) => vec![*node],
            Delivery::Broadcast(group) => inner.registry.members_of(group).into_iter().collect(),
        };
        recipients.sort();

        let (invoke, waiter) = if needs_reply {
            let id = inner.ids.next();
            let waiter = inner.pending.register(id, recipients.iter().copied().collect())?;
            (Invoke::with_reply(id, call), Some(waiter))
        } else {
            (Invoke::one_way(call), None)
        };
        debug!(node = %inner.local, %invoke, ?delivery, recipients = recipients.len(), "sending");

        let (local, remote): (Vec<NodeId>, Vec<NodeId>) = recipients.into_iter().partition(|n| *n == inner.local);

        if !remote.is_empty() {
            let payload = Envelope::Call(invoke.clone()).to_bytes()?;
            let failed = match remote.as_slice() {
                [node] => match inner.transport.send_to(*node, payload).await {
                    Ok(()) => Vec::new(),
                    Err(e) => vec![(*node, e)],
                },
                nodes => inner.transport.broadcast_to(nodes, payload).await,
            };
            for (node, e) in failed {
                warn!(%node, %invoke, error = %e, "send failed");
                if let Some(id) = invoke.id() {
                    inner.pending.deliver_reply(id, node, Outcome::Fault(Fault::RecipientGone { node }));
                }
            }
        }

        if !local.is_empty() {
            inner.enqueue(inner.local, invoke);
        }
        Ok(waiter)
    }

    /// Hands bytes received from `from` to the messenger. Never waits.
    ///
    /// Must be called from within a tokio runtime. Malformed frames are
    /// dropped and reported through [`Transport::protocol_violation`].
    pub fn on_envelope_received(&self, from: NodeId, bytes: &[u8]) {
        let inner = &self.inner;
        match Envelope::from_bytes(bytes) {
            Ok(Envelope::Call(invoke)) => {
                trace!(node = %inner.local, %from, %invoke, "received call");
                inner.enqueue(from, invoke);
            }
            Ok(Envelope::Reply(reply)) => {
                trace!(node = %inner.local, %from, id = %reply.id, "received reply");
                inner.pending.deliver_reply(reply.id, from, reply.outcome);
            }
            Err(e) => {
                warn!(node = %inner.local, %from, error = %e, "dropping malformed envelope");
                let reason = e.to_string();
                inner.transport.protocol_violation(from, &reason);
                // If the frame still names its call, fail that call now.
                let fault = Outcome::Fault(Fault::Protocol { message: reason });
                if let Ok(id) = peek_reply_id(bytes) {
                    inner.pending.deliver_reply(id, from, fault);
                } else if let Ok(id) = peek_call_id(bytes) {
                    let inner = inner.clone();
                    tokio::spawn(async move { inner.send_reply(from, id, fault).await });
                }
            }
        }
    }

    /// Tells the messenger `node` is gone.
    ///
    /// Replies still expected from it become [`Fault::RecipientGone`], it
    /// leaves every group, and its dispatch worker stops once drained.
    pub fn on_peer_disconnected(&self, node: NodeId) {
        let faulted = self.inner.pending.recipient_gone(node);
        self.inner.registry.forget_node(node);
        self.inner.workers.remove(&node);
        debug!(node = %self.inner.local, peer = %node, faulted, "peer disconnected");
    }

    /// Ends the session: releases every waiting caller and forgets all remotes.
    pub fn shutdown(&self) {
        self.inner.pending.fail_all();
        self.inner.registry.clear();
        self.inner.workers.clear();
        debug!(node = %self.inner.local, "messenger shut down");
    }

    /// Calls still waiting for replies.
    pub fn outstanding(&self) -> usize {
        self.inner.pending.len()
    }
}

impl fmt::Debug for UnifiedMessenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnifiedMessenger")
            .field("node", &self.inner.local)
            .field("outstanding", &self.inner.pending.len())
            .finish()
    }
}

impl Inner {
    /// Queues `invoke` on the worker for `from`, starting one if needed.
    fn enqueue(self: &Arc<Self>, from: NodeId, invoke: Invoke) {
        let tx = self
            .workers
            .entry(from)
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(run_worker(Arc::downgrade(self), from, rx));
                tx
            })
            .clone();

        if let Err(mpsc::error::SendError(invoke)) = tx.send(invoke) {
            warn!(node = %self.local, %from, %invoke, "worker gone, dropping call");
        }
    }

    /// Runs one call and routes its outcome back to the caller.
    async fn serve(&self, from: NodeId, invoke: Invoke, release: oneshot::Sender<()>) {
        let outcome = self.dispatcher.invoke_queued(&invoke, Some(release)).await;
        debug!(node = %self.local, %from, %invoke, fault = outcome.is_fault(), "dispatched");

        let Some(id) = invoke.id() else {
            return;
        };
        if from == self.local {
            self.pending.deliver_reply(id, self.local, outcome);
            return;
        }
        self.send_reply(from, id, outcome).await;
    }

    /// Sends `outcome` back to `to` as the reply to call `id`.
    async fn send_reply(&self, to: NodeId, id: CorrelationId, outcome: Outcome) {
        let bytes = match Envelope::Reply(Reply { id, outcome }).to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(node = %self.local, %to, %id, error = %e, "result does not encode");
                let fault = Outcome::Fault(Fault::Protocol { message: e.to_string() });
                match Envelope::Reply(Reply { id, outcome: fault }).to_bytes() {
                    Ok(bytes) => bytes,
                    Err(_) => return,
                }
            }
        };
        if let Err(e) = self.transport.send_to(to, bytes).await {
            warn!(node = %self.local, %to, %id, error = %e, "reply not sent");
        }
    }
}

async fn run_worker(inner: Weak<Inner>, from: NodeId, mut rx: mpsc::UnboundedReceiver<Invoke>) {
    while let Some(invoke) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let (release, released) = oneshot::channel();
        tokio::spawn(async move { inner.serve(from, invoke, release).await });
        // Fired when the handler waits on a nested call, dropped when it is done.
        let _ = released.await;
    }
    trace!(%from, "dispatch worker stopped");
}
