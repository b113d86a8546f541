//! Message definitions for the broker
//!
//! `Message` is the immutable unit of fan-out. The router wraps each one in an
//! `Arc` so every subscriber's queue shares the same allocation.
//!
//! Notes on fields:
//! - `topic`: topic name used for routing
//! - `payload`: opaque JSON value supplied by the publisher
//! - `origin`: publishing connection, carried for diagnostics only
//! - `timestamp`: milliseconds since UNIX epoch, set when the router accepts it

use serde_json::Value;

use crate::connection::ConnectionId;

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Value,
    pub origin: ConnectionId,
    pub timestamp: i64,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Value, origin: ConnectionId) -> Self {
        Self {
            topic: topic.into(),
            payload,
            origin,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}
