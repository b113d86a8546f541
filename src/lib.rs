//! # topic-relay
//!
//! `topic-relay` is an in-memory, real-time publish/subscribe relay. Clients
//! hold persistent connections, subscribe to named topics and publish JSON
//! payloads that are fanned out to every current subscriber.
//!
//! ## Core Modules
//!
//! - `connection`: one client session, its bounded outbound queue and lifecycle.
//! - `broker`: the topic registry and the router that performs fan-out.
//! - `transport`: the envelope protocol, dispatch table, connection manager
//!   and the WebSocket listener.
//! - `config`: layered configuration loading.
//! - `utils`: error type and logging setup.

pub mod broker;
pub mod config;
pub mod connection;
pub mod transport;
pub mod utils;

pub use broker::{Router, TopicRegistry};
pub use connection::{BackpressurePolicy, Connection, ConnectionId};
pub use transport::ConnectionManager;
pub use utils::{RelayError, Result};
