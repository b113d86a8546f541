use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use super::queue::{Outbound, OutboundQueue, QueueConfig, SendOutcome};
use super::state::{CloseReason, ConnectionState, Lifecycle};

/// Opaque, cheaply clonable connection identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
    /// A fresh `conn-<uuid>` identity.
    pub fn generate() -> Self {
        Self::from(format!("conn-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle and subscription back-references, guarded together so that a
/// subscribe can never race past a close.
#[derive(Debug, Default)]
pub(crate) struct Membership {
    pub(crate) lifecycle: Lifecycle,
    pub(crate) topics: HashSet<String>,
}

/// One client session.
///
/// A `Connection` owns its outbound queue and lifecycle. The topic registry
/// and the router only ever hold `Arc<Connection>` references to it; the
/// connection manager is the only component that opens and closes it.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    membership: Mutex<Membership>,
    state: watch::Sender<ConnectionState>,
    queue: OutboundQueue,
}

impl Connection {
    pub fn new(id: ConnectionId, queue: QueueConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            id,
            membership: Mutex::new(Membership::default()),
            state,
            queue: OutboundQueue::new(queue),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.membership.lock().lifecycle.reason().cloned()
    }

    /// `Connecting -> Open`. Returns `false` if the connection was already
    /// past `Connecting`.
    pub fn mark_open(&self) -> bool {
        let mut membership = self.membership.lock();
        let changed = membership.lifecycle.open();
        if changed {
            self.state.send_replace(membership.lifecycle.state());
        }
        changed
    }

    /// Enqueues `item` for the client. Returns without waiting unless the
    /// queue is full under `block-brief`. A no-op once the connection is
    /// closing.
    pub async fn send(&self, item: Outbound) -> SendOutcome {
        self.queue.push(item).await
    }

    /// Next item for the flush task, or `None` once closing has begun.
    pub async fn next_outbound(&self) -> Option<Outbound> {
        self.queue.pop().await
    }

    /// Wraps the client's inbound frames so the sequence also ends when this
    /// connection starts closing.
    pub fn receive<S>(&self, inbound: S) -> impl Stream<Item = S::Item> + Send + use<S>
    where
        S: Stream + Send + 'static,
    {
        inbound.take_until(self.closed())
    }

    /// Resolves once the connection is `Closing` or `Closed`.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + use<> {
        let mut state = self.state.subscribe();
        async move {
            let _ = state.wait_for(|s| s.is_terminating()).await;
        }
    }

    /// Closes the connection on its own: `closing -> closed`, discarding the
    /// queue. Idempotent. Leaves any registry subscriptions in place, so
    /// outside the crate connections are closed through
    /// `ConnectionManager::on_close`, which deregisters between
    /// [`begin_close`](Self::begin_close) and [`finish_close`](Self::finish_close).
    pub(crate) fn close(&self, reason: CloseReason) -> bool {
        let started = self.begin_close(reason);
        self.finish_close();
        started
    }

    /// First half of closing. Stops sends and the flush task immediately.
    /// Only the first call returns `true`.
    pub(crate) fn begin_close(&self, reason: CloseReason) -> bool {
        let mut membership = self.membership.lock();
        if !membership.lifecycle.begin_close(reason) {
            return false;
        }
        self.state.send_replace(membership.lifecycle.state());
        drop(membership);

        let discarded = self.queue.close();
        if discarded > 0 {
            tracing::debug!(connection = %self.id, discarded, "discarded queued items on close");
        }
        true
    }

    pub(crate) fn finish_close(&self) -> bool {
        let mut membership = self.membership.lock();
        let changed = membership.lifecycle.finish_close();
        if changed {
            self.state.send_replace(membership.lifecycle.state());
        }
        changed
    }

    pub(crate) fn membership(&self) -> MutexGuard<'_, Membership> {
        self.membership.lock()
    }

    /// Topics this connection is subscribed to, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.membership.lock().topics.iter().cloned().collect();
        topics.sort();
        topics
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.membership.lock().topics.contains(topic)
    }

    /// Items currently waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Items discarded by the backpressure policy so far.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}
