//! Bounded per-connection outbound queue.
//!
//! The router pushes, the connection's flush task pops. When the queue is
//! full the configured [`BackpressurePolicy`] decides what gets dropped; the
//! publisher never waits longer than `block_brief`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::broker::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackpressurePolicy {
    /// Evict the head of the queue to make room.
    #[default]
    DropOldest,
    /// Discard the item being sent.
    DropNewest,
    /// Wait up to `block_brief` for room, then discard the item being sent.
    BlockBrief,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
    pub policy: BackpressurePolicy,
    pub block_brief: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            policy: BackpressurePolicy::DropOldest,
            block_brief: Duration::from_millis(50),
        }
    }
}

/// One item waiting to be written to a client.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A published message; shared by every recipient of the fan-out.
    Deliver(Arc<Message>),
    Subscribed(String),
    Unsubscribed(String),
    Error(String),
}

/// Result of handing an item to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Enqueued,
    /// Enqueued after evicting the oldest queued item.
    DroppedOldest,
    /// The item itself was discarded.
    DroppedNewest,
    /// The connection is closing or closed; nothing happened.
    Closed,
}

impl SendOutcome {
    /// Whether the sent item is now in the queue.
    pub fn accepted(self) -> bool {
        matches!(self, SendOutcome::Enqueued | SendOutcome::DroppedOldest)
    }

    pub fn dropped(self) -> bool {
        matches!(self, SendOutcome::DroppedOldest | SendOutcome::DroppedNewest)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Outbound>,
    closed: bool,
}

#[derive(Debug)]
pub(crate) struct OutboundQueue {
    state: Mutex<QueueState>,
    config: QueueConfig,
    // wakes the single flush task
    ready: Notify,
    // wakes senders parked under block-brief
    space: Notify,
    dropped: AtomicU64,
}

impl OutboundQueue {
    pub(crate) fn new(config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            config: QueueConfig {
                capacity: config.capacity.max(1),
                ..config
            },
            ready: Notify::new(),
            space: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) async fn push(&self, item: Outbound) -> SendOutcome {
        let mut item = match self.try_push(item) {
            Ok(outcome) => return outcome,
            Err(item) => item,
        };

        let deadline = Instant::now() + self.config.block_brief;
        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            item = match self.try_push(item) {
                Ok(outcome) => return outcome,
                Err(item) => item,
            };

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return SendOutcome::DroppedNewest;
            }
        }
    }

    /// Applies the policy without waiting. Hands the item back only when the
    /// queue is full under `BlockBrief`.
    fn try_push(&self, item: Outbound) -> Result<SendOutcome, Outbound> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(SendOutcome::Closed);
        }

        let outcome = if state.items.len() < self.config.capacity {
            state.items.push_back(item);
            SendOutcome::Enqueued
        } else {
            match self.config.policy {
                BackpressurePolicy::DropOldest => {
                    state.items.pop_front();
                    state.items.push_back(item);
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    SendOutcome::DroppedOldest
                }
                BackpressurePolicy::DropNewest => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return Ok(SendOutcome::DroppedNewest);
                }
                BackpressurePolicy::BlockBrief => return Err(item),
            }
        };
        drop(state);

        self.ready.notify_one();
        Ok(outcome)
    }

    /// Waits for the next item. `None` once the queue is closed, even if
    /// items were still pending.
    pub(crate) async fn pop(&self) -> Option<Outbound> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    drop(state);
                    self.space.notify_waiters();
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    /// Discards everything queued and refuses further items.
    pub(crate) fn close(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            state.closed = true;
            let n = state.items.len();
            state.items.clear();
            state.items.shrink_to_fit();
            n
        };
        self.ready.notify_one();
        self.space.notify_waiters();
        discarded
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
