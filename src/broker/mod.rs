//! The `broker` module is the routing core: the topic registry, the router
//! that fans messages out, and the message type they share.

pub mod message;
pub mod registry;
pub mod router;
pub mod topic;

pub use message::Message;
pub use registry::TopicRegistry;
pub use router::{PublishReport, Router};
pub use topic::{Snapshot, Topic};

#[cfg(test)]
mod tests;
