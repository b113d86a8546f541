//! The `transport` module connects clients to the routing core.
//!
//! It defines the JSON envelope protocol, the dispatch table that maps each
//! envelope action to a handler, the connection manager that owns connection
//! lifecycle, and the WebSocket listener that feeds it.

pub mod dispatch;
pub mod manager;
pub mod message;
pub mod websocket;

pub use dispatch::DispatchTable;
pub use manager::{ConnectionManager, RelayStats};
pub use message::{Action, Envelope, ServerMessage};
pub use websocket::{serve, start_websocket_server};
