//! The `transport` module is responsible for the network edge of the
//! notification service.
//!
//! It defines the wire codec used between clients and the server and
//! implements the WebSocket binding: upgrade, authentication, registration
//! with the channel registry and forwarding of frames to the protocol handler.

pub mod auth;
pub mod message;
pub mod websocket;

#[cfg(test)]
mod tests;

#[cfg(test)]
mod websocket_tests;
