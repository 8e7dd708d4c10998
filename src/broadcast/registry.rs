//! Bookkeeping of open client connections.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::jobs::model::JobId;
use crate::types::{AppError, Result};

pub type ConnectionId = Uuid;

/// Sender half of a connection's outbound queue.
pub type Outbound = mpsc::Sender<Arc<str>>;

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The bounded queue is full
    Full,
    /// The receiving side is gone
    Closed,
}

/// A connection as seen by the registry.
pub struct RegisteredConnection {
    sender: Outbound,
    closed: CancellationToken,
    subscriptions: HashSet<JobId>,
}

impl RegisteredConnection {
    /// Queue a frame without waiting.
    pub fn try_deliver(&self, payload: &Arc<str>) -> std::result::Result<(), DeliveryError> {
        self.sender.try_send(Arc::clone(payload)).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    pub fn is_subscribed(&self, job: &JobId) -> bool {
        self.subscriptions.contains(job)
    }
}

/// Tracks every open connection and its bounded outbound queue.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application. Delivery happens under the read lock and
/// removal under the write lock, so once [`remove`](Self::remove) returns the
/// connection can no longer be handed an event.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, RegisteredConnection>>,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new connection with the default queue bound.
    ///
    /// Returns the guard owned by the transport and the receiver half of the
    /// outbound queue, which the transport drains into its socket.
    pub fn add(self: &Arc<Self>) -> (Connection, mpsc::Receiver<Arc<str>>) {
        self.add_with_capacity(self.queue_capacity)
    }

    pub fn add_with_capacity(
        self: &Arc<Self>,
        capacity: usize,
    ) -> (Connection, mpsc::Receiver<Arc<str>>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();

        self.insert(id, tx.clone(), closed.clone());
        tracing::debug!(conn_id = %id, capacity, "connection registered");

        let connection = Connection {
            replier: Replier {
                id,
                replies: tx,
                closed,
                registry: Arc::downgrade(self),
            },
        };
        (connection, rx)
    }

    /// Insert unless the id is already present. Returns whether it was added.
    fn insert(&self, id: ConnectionId, sender: Outbound, closed: CancellationToken) -> bool {
        let mut connections = self.connections.write();
        if connections.contains_key(&id) {
            return false;
        }
        connections.insert(
            id,
            RegisteredConnection {
                sender,
                closed,
                subscriptions: HashSet::new(),
            },
        );
        true
    }

    /// Remove a connection. Unknown ids are a no-op.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.write().remove(id);
        match removed {
            Some(conn) => {
                conn.closed.cancel();
                tracing::debug!(conn_id = %id, "connection removed");
                true
            }
            None => false,
        }
    }

    /// Remove a connection whose queue overflowed.
    pub fn drop_overloaded(&self, id: &ConnectionId) -> bool {
        let removed = self.remove(id);
        if removed {
            let err = AppError::Overload(format!(
                "outbound queue of connection {} exceeded {} frames",
                id, self.queue_capacity
            ));
            tracing::warn!(conn_id = %id, error = %err, "dropping slow connection");
        }
        removed
    }

    /// Visit every registered connection under the read lock.
    ///
    /// `f` must not block. Connections added concurrently may or may not be
    /// visited; removed ones never are.
    pub fn for_each(&self, mut f: impl FnMut(&ConnectionId, &RegisteredConnection)) {
        let connections = self.connections.read();
        for (id, conn) in connections.iter() {
            f(id, conn);
        }
    }

    pub fn subscribe(&self, id: &ConnectionId, job: &JobId) -> Result<()> {
        let mut connections = self.connections.write();
        let conn = connections
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Connection '{}' not found", id)))?;
        conn.subscriptions.insert(job.clone());
        Ok(())
    }

    /// Drop every subscription to `job`.
    pub fn release_job(&self, job: &JobId) {
        let mut connections = self.connections.write();
        for conn in connections.values_mut() {
            conn.subscriptions.remove(job);
        }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Remove every connection. Safe to call more than once.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.connections.write().drain().collect();
        let count = drained.len();
        for (_, conn) in drained {
            conn.closed.cancel();
        }
        if count > 0 {
            tracing::info!(count, "closed all connections");
        }
    }
}

/// Transport-side handle of a registered connection.
///
/// Dropping it removes the connection from the registry, so a connection is
/// released however its transport task ends.
pub struct Connection {
    replier: Replier,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.replier.id
    }

    pub fn is_closed(&self) -> bool {
        self.replier.is_closed()
    }

    /// Resolves once the registry has dropped this connection.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.replier.closed.cancelled()
    }

    /// Queue a direct reply on this connection.
    pub fn reply(&self, text: impl Into<Arc<str>>) -> Result<()> {
        self.replier.reply(text)
    }

    /// A handle for replying from another task.
    ///
    /// It does not keep the connection registered.
    pub fn replier(&self) -> Replier {
        self.replier.clone()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(registry) = self.replier.registry.upgrade() {
            registry.remove(&self.replier.id);
        }
    }
}

/// Cloneable reply side of a [`Connection`].
#[derive(Clone)]
pub struct Replier {
    id: ConnectionId,
    replies: Outbound,
    closed: CancellationToken,
    registry: Weak<ConnectionRegistry>,
}

impl Replier {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Queue a direct reply.
    ///
    /// A full queue is treated like a full queue during broadcast: the
    /// connection is dropped.
    pub fn reply(&self, text: impl Into<Arc<str>>) -> Result<()> {
        if self.is_closed() {
            return Err(AppError::NotFound(format!("Connection '{}' is closed", self.id)));
        }
        match self.replies.try_send(text.into()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                if let Some(registry) = self.registry.upgrade() {
                    registry.drop_overloaded(&self.id);
                }
                Err(AppError::Overload(format!(
                    "outbound queue of connection {} is full",
                    self.id
                )))
            }
            Err(TrySendError::Closed(_)) => Err(AppError::NotFound(format!(
                "Connection '{}' is closed",
                self.id
            ))),
        }
    }
}
