//! The `client` module defines the representation of one live connection.
//!
//! It provides the `Client` handle, which carries the connection id, the
//! sender half feeding the socket writer and the identity attached at
//! upgrade time.

pub mod pubsub_client;
pub use pubsub_client::{Client, ClientId, Identity};
