//! Redis Pub/Sub backbone.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Backbone, PayloadStream};
use crate::utils::error::BackboneError;

/// Publishes through a `ConnectionManager`, which reconnects on its own, and
/// subscribes on a dedicated pub/sub connection per subscription.
///
/// Nothing connects until the first publish or subscribe, so building one
/// never fails because Redis is down.
pub struct RedisBackbone {
    client: redis::Client,
    publisher: Mutex<Option<ConnectionManager>>,
    closed: AtomicBool,
}

impl RedisBackbone {
    /// Example URL: `redis://127.0.0.1:6379`. Only the URL is validated here.
    pub fn new(redis_url: &str) -> Result<Self, BackboneError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            publisher: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    async fn publisher(&self) -> Result<ConnectionManager, BackboneError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackboneError::Closed);
        }
        let mut publisher = self.publisher.lock().await;
        if let Some(manager) = publisher.as_ref() {
            return Ok(manager.clone());
        }
        let manager = ConnectionManager::new(self.client.clone()).await?;
        debug!("Redis publisher connected");
        *publisher = Some(manager.clone());
        Ok(manager)
    }
}

impl fmt::Debug for RedisBackbone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBackbone")
            .field("client", &"redis::Client")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl Backbone for RedisBackbone {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BackboneError> {
        let mut conn = self.publisher().await?;
        let _receivers: i64 = conn.publish(topic, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, BackboneError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackboneError::Closed);
        }
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;
        debug!(topic = %topic, "Redis subscriber connected");

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!("Dropping non-text backbone payload: {e}");
                        None
                    }
                }
            });
        Ok(stream.boxed())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.publisher.lock().await.take();
    }
}
