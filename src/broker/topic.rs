//! Topic management
//!
//! A `Topic` holds the subscribers of one topic name. Mutations happen under
//! the topic's own lock and publish a fresh copy-on-write snapshot, so
//! readers never wait on subscribe/unsubscribe and never see a partial set.
//!
//! A topic that loses its last subscriber is *retired*: it refuses further
//! inserts and the registry drops it from its map.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::connection::{Connection, ConnectionId};

/// Point-in-time view of a topic's subscribers.
pub type Snapshot = Arc<Vec<Arc<Connection>>>;

#[derive(Debug, Default)]
struct Members {
    subscribers: HashMap<ConnectionId, Arc<Connection>>,
    retired: bool,
}

#[derive(Debug)]
pub struct Topic {
    name: String,
    members: Mutex<Members>,
    snapshot: ArcSwap<Vec<Arc<Connection>>>,
}

impl Topic {
    /// Create a new topic with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: Mutex::new(Members::default()),
            snapshot: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a subscriber. `None` if the topic has been retired and the caller
    /// must look it up again; otherwise whether the subscriber was new.
    pub(crate) fn insert(&self, connection: &Arc<Connection>) -> Option<bool> {
        let mut members = self.members.lock();
        if members.retired {
            return None;
        }
        let added = members
            .subscribers
            .insert(connection.id().clone(), Arc::clone(connection))
            .is_none();
        if added {
            self.rebuild(&members);
        }
        Some(added)
    }

    /// Removes a subscriber. Returns `true` if the topic is now empty.
    pub(crate) fn remove(&self, id: &ConnectionId) -> bool {
        let mut members = self.members.lock();
        if members.subscribers.remove(id).is_some() {
            self.rebuild(&members);
        }
        members.subscribers.is_empty()
    }

    /// Marks an empty topic as retired. No-op (returns `false`) if someone
    /// subscribed in the meantime.
    pub(crate) fn retire_if_empty(&self) -> bool {
        let mut members = self.members.lock();
        if members.subscribers.is_empty() && !members.retired {
            members.retired = true;
            true
        } else {
            false
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.load_full()
    }

    pub fn len(&self) -> usize {
        self.members.lock().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.lock().subscribers.contains_key(id)
    }

    fn rebuild(&self, members: &Members) {
        let next: Vec<Arc<Connection>> = members.subscribers.values().cloned().collect();
        self.snapshot.store(Arc::new(next));
    }
}
