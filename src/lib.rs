//! # NotifSub
//!
//! `notifsub` pushes server-side update notifications to WebSocket clients.
//! Clients subscribe to named channels scoped by topic (`items/42`), each
//! subscription is gated by an asynchronous per-topic validator, and every
//! publish reaches matching subscribers on every server process through a
//! shared pub/sub backbone.
//!
//! ## Core Modules
//!
//! - `broker`: The channel registry: connections, channels, subscriptions and the heartbeat.
//! - `client`: Represents a connected WebSocket client and its identity.
//! - `service`: The protocol handler and the per-topic subscription validators.
//! - `backbone`: Cross-process fan-out over Redis Pub/Sub or an in-process bus.
//! - `transport`: The wire codec, authentication and the WebSocket server.
//! - `config`: Handles loading and managing server configuration.
//! - `utils`: Shared utilities, such as error types and logging setup.

pub mod backbone;
pub mod broker;
pub mod client;
pub mod config;
pub mod service;
pub mod transport;
pub mod utils;
