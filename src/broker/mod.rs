//! The `broker` module holds the in-process channel registry.
//!
//! [`WebSocketChannels`] maps channel names to subscriber sets and
//! connections to their subscription sets, fans messages out to sockets and
//! runs the heartbeat that evicts dead connections and collects empty
//! channels.

pub mod channel;
pub mod engine;

pub use channel::{BROADCAST, Channel, scoped_channel_name};
pub use engine::{ChannelsStats, HeartbeatConfig, HeartbeatReport, WebSocketChannels};
