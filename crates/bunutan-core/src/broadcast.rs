// State broadcaster: registry of connected observers and fan-out of events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::protocol::Outbound;

/// Process-unique identifier of one connection.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh [`ConnectionId`].
pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Events an observer may have pending before it is considered stalled and
/// dropped. A full session broadcasts once per draw and once per reset.
pub const OBSERVER_QUEUE_CAPACITY: usize = 256;

/// Sender half of an observer's outbound queue.
pub type ObserverTx = mpsc::Sender<Outbound>;

/// Receiver half of an observer's outbound queue, drained by its writer.
pub type ObserverRx = mpsc::Receiver<Outbound>;

/// Create the outbound queue for one observer.
pub fn observer_queue() -> (ObserverTx, ObserverRx) {
    mpsc::channel(OBSERVER_QUEUE_CAPACITY)
}

/// Registry of active observers.
///
/// Owned by the single event-loop task, so registration, unregistration and
/// fan-out are serialized with store mutations. Sends never block the loop:
/// an observer whose queue is closed or full is removed, which closes its
/// queue and ends its connection.
#[derive(Debug, Default)]
pub struct Broadcaster {
    observers: HashMap<ConnectionId, ObserverTx>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer. Re-registering an id replaces its queue.
    pub fn register(&mut self, id: ConnectionId, tx: ObserverTx) {
        if self.observers.insert(id, tx).is_some() {
            warn!(conn_id = id, "Observer re-registered, previous queue replaced");
        }
        info!(conn_id = id, observers = self.observers.len(), "Observer registered");
    }

    /// Remove an observer. Unknown ids are ignored.
    pub fn unregister(&mut self, id: ConnectionId) -> bool {
        let removed = self.observers.remove(&id).is_some();
        if removed {
            info!(conn_id = id, observers = self.observers.len(), "Observer unregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Send an event to a single observer. Returns false if the observer is
    /// unknown, or its queue is closed or full (in which case it is dropped).
    pub fn send_to(&mut self, id: ConnectionId, event: Outbound) -> bool {
        let Some(tx) = self.observers.get(&id) else {
            debug!(conn_id = id, "Reply to unknown observer dropped");
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                self.drop_observer(id, &e);
                false
            }
        }
    }

    /// Send an event to every registered observer. Observers whose queues are
    /// closed or full are removed. Returns how many observers received it.
    pub fn broadcast(&mut self, event: &Outbound) -> usize {
        let mut failed = Vec::new();
        let mut delivered = 0;
        for (&id, tx) in &self.observers {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => failed.push((id, e)),
            }
        }
        for (id, e) in failed {
            self.drop_observer(id, &e);
        }
        debug!(delivered, "Broadcast sent");
        delivered
    }

    fn drop_observer(&mut self, id: ConnectionId, err: &TrySendError<Outbound>) {
        self.observers.remove(&id);
        match err {
            TrySendError::Full(_) => warn!(
                conn_id = id,
                capacity = OBSERVER_QUEUE_CAPACITY,
                "Observer stopped reading, removed"
            ),
            TrySendError::Closed(_) => warn!(conn_id = id, "Observer queue closed, removed"),
        }
    }
}
