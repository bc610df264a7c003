//! In-memory backbone for single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Mutex, broadcast};
use tracing::warn;

use super::{Backbone, PayloadStream};
use crate::utils::error::BackboneError;

/// Broadcast-channel bus. Clones share the same bus, so several brokers built
/// from clones of one `MemoryBackbone` behave like separate processes sharing
/// a Redis server.
#[derive(Debug, Clone)]
pub struct MemoryBackbone {
    /// Topic → broadcast sender.
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
    /// Buffer size for broadcast channels.
    buffer_size: usize,
}

impl MemoryBackbone {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            buffer_size,
        }
    }

    async fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        let mut topics = self.topics.lock().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer_size).0)
            .clone()
    }
}

impl Default for MemoryBackbone {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Backbone for MemoryBackbone {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BackboneError> {
        // no receivers is not an error for pub/sub
        let _ = self.sender(topic).await.send(payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, BackboneError> {
        let rx = self.sender(topic).await.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Backbone subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}
