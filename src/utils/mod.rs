//! The `utils` module provides the shared pieces used across `topic-relay`:
//! the crate-wide error type and tracing initialization.

pub mod error;
pub mod logging;

pub use error::{RelayError, Result};
