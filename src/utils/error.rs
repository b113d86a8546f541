//! Error types for the relay.
//!
//! `RelayError` covers every failure a caller can observe. Queue overflow is
//! deliberately absent: it is handled by the backpressure policy and only
//! shows up in diagnostic counters.

use crate::connection::ConnectionId;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("connection {0} is not open")]
    ConnectionClosed(ConnectionId),
    #[error("connection limit reached ({0})")]
    ConnectionLimit(usize),
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RelayError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedEnvelope(detail.into())
    }
}
