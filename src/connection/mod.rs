//! The `connection` module models one client session: its identity, its
//! bounded outbound queue and its lifecycle state machine.

mod handle;
mod queue;
mod state;

pub use handle::{Connection, ConnectionId};
pub use queue::{BackpressurePolicy, Outbound, QueueConfig, SendOutcome};
pub use state::{CloseReason, ConnectionState, Lifecycle};
