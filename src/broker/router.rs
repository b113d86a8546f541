//! Router
//!
//! Delivers one published message to every current subscriber of its topic.
//! Each delivery goes into the subscriber's own queue. Under `block-brief`
//! subscribers are served in turn, so every full queue in the snapshot costs
//! the publisher up to one `block_brief` wait; the other policies never wait.

use std::sync::Arc;

use serde_json::Value;

use crate::broker::message::Message;
use crate::broker::registry::TopicRegistry;
use crate::connection::{ConnectionId, Outbound};

/// What happened to one publish.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers whose queue now holds the message.
    pub recipients: usize,
    /// Items discarded by backpressure along the way.
    pub dropped: usize,
}

#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<TopicRegistry>,
    echo_to_sender: bool,
}

impl Router {
    pub fn new(registry: Arc<TopicRegistry>, echo_to_sender: bool) -> Self {
        Self {
            registry,
            echo_to_sender,
        }
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    /// Fans `payload` out to the subscribers of `topic` as of this call.
    /// Publishing to a topic nobody listens to does nothing.
    pub async fn publish(&self, topic: &str, payload: Value, origin: &ConnectionId) -> PublishReport {
        let subscribers = self.registry.subscribers_of(topic);
        let mut report = PublishReport::default();
        if subscribers.is_empty() {
            tracing::trace!(topic, origin = %origin, "publish with no subscribers");
            return report;
        }

        let message = Arc::new(Message::new(topic, payload, origin.clone()));
        for subscriber in subscribers.iter() {
            if !self.echo_to_sender && subscriber.id() == origin {
                continue;
            }
            let outcome = subscriber
                .send(Outbound::Deliver(Arc::clone(&message)))
                .await;
            if outcome.accepted() {
                report.recipients += 1;
            }
            if outcome.dropped() {
                report.dropped += 1;
                tracing::debug!(
                    topic,
                    subscriber = %subscriber.id(),
                    ?outcome,
                    total_dropped = subscriber.dropped(),
                    "subscriber queue full"
                );
            }
        }
        report
    }
}
