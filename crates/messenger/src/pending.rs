//! # Pending Calls
//!
//! Outstanding calls awaiting replies, keyed by correlation id.
//!
//! Each entry owns the `oneshot` sender that releases its caller. Whoever
//! removes an entry from the map (the reply that completes it, a disconnect,
//! teardown, or the caller's own timeout) is the only party that may touch
//! that sender, so a caller is released exactly once.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use invokerpc::CorrelationId;
use invokerpc::Fault;
use invokerpc::NodeId;
use invokerpc::Outcome;
use tokio::sync::oneshot;
use tracing::trace;

use crate::dispatch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No complete set of replies arrived in time.
    Timeout(CorrelationId),
    /// The table already holds the configured number of calls.
    TooManyPending(usize),
    /// The entry vanished without releasing its waiter.
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(id) => write!(f, "call {} timed out", id),
            Self::TooManyPending(max) => write!(f, "too many pending calls (limit {})", max),
            Self::Closed => write!(f, "pending call closed without a result"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcomes keyed by the node that produced them.
pub type Gathered = HashMap<NodeId, Outcome>;

struct PendingCall {
    expected: HashSet<NodeId>,
    replies: Gathered,
    tx: oneshot::Sender<Gathered>,
}

impl PendingCall {
    fn is_complete(&self) -> bool {
        self.replies.len() == self.expected.len()
    }

    /// Records `outcome` unless `from` is unexpected or already answered.
    fn record(&mut self, from: NodeId, outcome: Outcome) -> bool {
        if !self.expected.contains(&from) || self.replies.contains_key(&from) {
            return false;
        }
        self.replies.insert(from, outcome);
        true
    }

    fn release(self) {
        // The waiter may have been dropped; nothing else to tell.
        let _ = self.tx.send(self.replies);
    }
}

pub struct PendingCalls {
    calls: DashMap<CorrelationId, PendingCall>,
    /// Entries in `calls` plus registrations about to insert one.
    slots: AtomicUsize,
    max_pending: usize,
}

impl PendingCalls {
    pub fn new(max_pending: usize) -> Self {
        Self { calls: DashMap::new(), slots: AtomicUsize::new(0), max_pending }
    }

    /// Opens a call expecting one reply from each node in `expected`.
    ///
    /// Must happen before the call is sent, so that no reply can beat it.
    pub fn register(&self, id: CorrelationId, expected: HashSet<NodeId>) -> Result<Waiter<'_>> {
        let (tx, rx) = oneshot::channel();
        if expected.is_empty() {
            let _ = tx.send(Gathered::new());
            return Ok(Waiter { id, rx, table: self });
        }
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < self.max_pending).then_some(n + 1))
            .map_err(|_| Error::TooManyPending(self.max_pending))?;
        if self.calls.insert(id, PendingCall { expected, replies: Gathered::new(), tx }).is_some() {
            self.slots.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(Waiter { id, rx, table: self })
    }

    /// Records a reply from `from`. Returns whether it was accepted.
    ///
    /// Replies for unknown or finished calls, from nodes that were not
    /// addressed, or from nodes that already replied are dropped.
    pub fn deliver_reply(&self, id: CorrelationId, from: NodeId, outcome: Outcome) -> bool {
        let mut accepted = false;
        let removed = self.calls.remove_if_mut(&id, |_, call| {
            accepted = call.record(from, outcome);
            accepted && call.is_complete()
        });

        if let Some((_, call)) = removed {
            self.slots.fetch_sub(1, Ordering::AcqRel);
            trace!(%id, %from, "pending call complete");
            call.release();
        } else if !accepted {
            trace!(%id, %from, "dropped stray reply");
        }
        accepted
    }

    /// Faults every outstanding reply expected from `node`.
    pub fn recipient_gone(&self, node: NodeId) -> usize {
        let waiting: Vec<CorrelationId> = self
            .calls
            .iter()
            .filter(|call| call.expected.contains(&node) && !call.replies.contains_key(&node))
            .map(|call| *call.key())
            .collect();

        waiting
            .into_iter()
            .filter(|id| self.deliver_reply(*id, node, Outcome::Fault(Fault::RecipientGone { node })))
            .count()
    }

    /// Releases every waiter, faulting whatever replies are still missing.
    pub fn fail_all(&self) {
        let ids: Vec<CorrelationId> = self.calls.iter().map(|call| *call.key()).collect();
        for id in ids {
            let Some(mut call) = self.take(&id) else {
                continue;
            };
            let missing: Vec<NodeId> = call
                .expected
                .iter()
                .filter(|node| !call.replies.contains_key(node))
                .copied()
                .collect();
            for node in missing {
                call.replies.insert(node, Outcome::Fault(Fault::RecipientGone { node }));
            }
            call.release();
        }
    }

    /// Number of calls still awaiting replies.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    fn take(&self, id: &CorrelationId) -> Option<PendingCall> {
        let (_, call) = self.calls.remove(id)?;
        self.slots.fetch_sub(1, Ordering::AcqRel);
        Some(call)
    }

    /// Forgets `id` without releasing its waiter. Returns whether it was present.
    fn abandon(&self, id: &CorrelationId) -> bool {
        self.take(id).is_some()
    }
}

/// The caller's side of a pending call.
///
/// Dropping a waiter abandons the call; late replies are then discarded.
pub struct Waiter<'a> {
    id: CorrelationId,
    rx: oneshot::Receiver<Gathered>,
    table: &'a PendingCalls,
}

impl Waiter<'_> {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Waits until every expected node has an outcome, or `timeout` elapses.
    ///
    /// Inside a handler this first frees the handler's sender queue.
    pub async fn wait(mut self, timeout: Duration) -> Result<Gathered> {
        dispatch::release_queue();
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(gathered) => gathered.map_err(|_| Error::Closed),
            Err(_) => {
                if self.table.abandon(&self.id) {
                    trace!(id = %self.id, "pending call timed out");
                    return Err(Error::Timeout(self.id));
                }
                // Lost the race: whoever removed the entry is sending right now.
                (&mut self.rx).await.map_err(|_| Error::Closed)
            }
        }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.table.abandon(&self.id);
    }
}
