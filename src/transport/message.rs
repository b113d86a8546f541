//! Wire envelopes.
//!
//! Clients send JSON text frames shaped as [`Envelope`]; the relay answers
//! with [`ServerMessage`] frames tagged by `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::{ConnectionId, Outbound};
use crate::utils::{RelayError, Result};

/// Longest accepted topic name, in bytes.
pub const MAX_TOPIC_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Publish,
    Subscribe,
    Unsubscribe,
}

/// Inbound envelope: `{ "action", "topic", "payload"? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: Action,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    pub fn publish(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            action: Action::Publish,
            topic: topic.into(),
            payload: Some(payload),
        }
    }

    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self {
            action: Action::Subscribe,
            topic: topic.into(),
            payload: None,
        }
    }

    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self {
            action: Action::Unsubscribe,
            topic: topic.into(),
            payload: None,
        }
    }

    /// Parses and validates one inbound frame.
    pub fn parse(raw: &str, max_frame_bytes: usize) -> Result<Self> {
        if raw.len() > max_frame_bytes {
            return Err(RelayError::malformed(format!(
                "frame of {} bytes exceeds the {max_frame_bytes} byte limit",
                raw.len()
            )));
        }

        let envelope: Envelope =
            serde_json::from_str(raw).map_err(|e| RelayError::malformed(e.to_string()))?;

        if envelope.topic.trim().is_empty() {
            return Err(RelayError::malformed("topic must not be empty"));
        }
        if envelope.topic.len() > MAX_TOPIC_LEN {
            return Err(RelayError::malformed(format!(
                "topic longer than {MAX_TOPIC_LEN} bytes"
            )));
        }
        if envelope.action == Action::Publish && envelope.payload.is_none() {
            return Err(RelayError::malformed("publish requires a payload"));
        }
        Ok(envelope)
    }
}

/// Outbound frame, borrowed from the queued [`Outbound`] item.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage<'a> {
    Message {
        topic: &'a str,
        payload: &'a Value,
        #[serde(rename = "originId")]
        origin_id: &'a ConnectionId,
        timestamp: i64,
    },
    Subscribed {
        topic: &'a str,
    },
    Unsubscribed {
        topic: &'a str,
    },
    Error {
        message: &'a str,
    },
}

impl<'a> From<&'a Outbound> for ServerMessage<'a> {
    fn from(item: &'a Outbound) -> Self {
        match item {
            Outbound::Deliver(message) => ServerMessage::Message {
                topic: &message.topic,
                payload: &message.payload,
                origin_id: &message.origin,
                timestamp: message.timestamp,
            },
            Outbound::Subscribed(topic) => ServerMessage::Subscribed { topic },
            Outbound::Unsubscribed(topic) => ServerMessage::Unsubscribed { topic },
            Outbound::Error(message) => ServerMessage::Error { message },
        }
    }
}

/// Serializes a queued item into a text frame.
pub fn encode(item: &Outbound) -> serde_json::Result<String> {
    serde_json::to_string(&ServerMessage::from(item))
}
