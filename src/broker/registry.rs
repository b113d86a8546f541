//! Topic registry
//!
//! Concurrency-safe directory of topic name -> subscribers. The outer map is
//! only write-locked to create or drop a topic; membership changes lock a
//! single topic. Lock order is always connection membership, then the map,
//! then a topic.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::broker::topic::{Snapshot, Topic};
use crate::connection::{Connection, ConnectionId};
use crate::utils::{RelayError, Result};

#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `connection` to `topic`, creating the topic if needed.
    /// Re-subscribing is a no-op and returns `Ok(false)`. Fails if the
    /// connection is not open.
    pub fn subscribe(&self, topic: &str, connection: &Arc<Connection>) -> Result<bool> {
        let mut membership = connection.membership();
        if !membership.lifecycle.state().is_open() {
            return Err(RelayError::ConnectionClosed(connection.id().clone()));
        }
        if membership.topics.contains(topic) {
            return Ok(false);
        }

        // a retired topic refuses the insert; look it up again
        while self.entry(topic).insert(connection).is_none() {}

        membership.topics.insert(topic.to_string());
        Ok(true)
    }

    /// Removes `connection` from `topic`. Returns `false` if it was not
    /// subscribed.
    pub fn unsubscribe(&self, topic: &str, connection: &Connection) -> bool {
        let mut membership = connection.membership();
        if !membership.topics.remove(topic) {
            return false;
        }
        self.detach(topic, connection.id());
        true
    }

    /// Removes `connection` from every topic it belongs to and returns how
    /// many that was. Once this returns, no snapshot taken afterwards
    /// contains the connection.
    pub fn unsubscribe_all(&self, connection: &Connection) -> usize {
        let mut membership = connection.membership();
        let topics: Vec<String> = membership.topics.drain().collect();
        for topic in &topics {
            self.detach(topic, connection.id());
        }
        topics.len()
    }

    /// Point-in-time subscribers of `topic`; empty for an unknown topic.
    pub fn subscribers_of(&self, topic: &str) -> Snapshot {
        self.topics
            .read()
            .get(topic)
            .map(|t| t.snapshot())
            .unwrap_or_default()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, |t| t.len())
    }

    /// Known topic names, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn entry(&self, topic: &str) -> Arc<Topic> {
        if let Some(existing) = self.topics.read().get(topic) {
            return Arc::clone(existing);
        }
        let mut topics = self.topics.write();
        Arc::clone(
            topics
                .entry(topic.to_string())
                .or_insert_with(|| Arc::new(Topic::new(topic))),
        )
    }

    fn detach(&self, topic: &str, id: &ConnectionId) {
        let Some(entry) = self.topics.read().get(topic).cloned() else {
            return;
        };
        if entry.remove(id) {
            self.prune(topic, &entry);
        }
    }

    fn prune(&self, topic: &str, entry: &Arc<Topic>) {
        let mut topics = self.topics.write();
        if !entry.retire_if_empty() {
            return;
        }
        if topics.get(topic).is_some_and(|current| Arc::ptr_eq(current, entry)) {
            topics.remove(topic);
            tracing::trace!(topic, "dropped empty topic");
        }
    }
}
