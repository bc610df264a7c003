//! The `backbone` module connects independent server processes.
//!
//! Every publish is wrapped in an [`Envelope`] and sent on one shared
//! pub/sub topic; every process's [`MultiInstanceChannelsBroker`] receives it
//! and delivers it to its local channel registry. The transport behind the
//! [`Backbone`] trait is Redis Pub/Sub in production and an in-process
//! broadcast bus for single-process deployments and tests.

pub mod broker;
pub mod memory;
pub mod redis_pubsub;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::utils::error::BackboneError;

pub use broker::{Destination, Envelope, MultiInstanceChannelsBroker};
pub use memory::MemoryBackbone;
pub use redis_pubsub::RedisBackbone;

/// Payloads received on a subscribed topic, in delivery order.
pub type PayloadStream = BoxStream<'static, String>;

/// A pub/sub transport shared by every process of a deployment.
#[async_trait]
pub trait Backbone: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BackboneError>;

    /// Subscribes to `topic`. Dropping the stream ends the subscription.
    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, BackboneError>;

    /// Releases connections held for publishing.
    async fn close(&self) {}
}
