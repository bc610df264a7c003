//! Cross-process broker.
//!
//! Publishes always round-trip through the backbone, local subscribers
//! included, so every process sees one channel's messages in backbone order.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Backbone, PayloadStream};
use crate::broker::{BROADCAST, WebSocketChannels};
use crate::transport::message::{Realm, ServerMessage};
use crate::utils::error::BackboneError;

/// Pause between failed subscribe attempts.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Where an envelope is delivered on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Scoped channel name.
    Channel(String),
    /// Every connected client.
    Broadcast,
}

/// Message as carried on the backbone topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub realm: Realm,
    /// Scoped channel name, or `"broadcast"`.
    pub channel: String,
    pub data: ServerMessage,
}

impl Envelope {
    pub fn new(destination: Destination, data: ServerMessage) -> Self {
        let channel = match destination {
            Destination::Channel(name) => name,
            Destination::Broadcast => BROADCAST.to_string(),
        };
        Self {
            realm: Realm::Notif,
            channel,
            data,
        }
    }

    pub fn destination(&self) -> Destination {
        if self.channel == BROADCAST {
            Destination::Broadcast
        } else {
            Destination::Channel(self.channel.clone())
        }
    }
}

/// Bridges one process's channel registry to the shared backbone.
pub struct MultiInstanceChannelsBroker {
    backbone: Arc<dyn Backbone>,
    topic: String,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl MultiInstanceChannelsBroker {
    /// Subscribes to `topic` on the backbone and starts delivering received
    /// envelopes to `channels`.
    ///
    /// The first subscription is awaited so nothing published after `new`
    /// returns is missed. If it fails, or any later subscription ends, the
    /// listener subscribes again until the broker is closed.
    pub async fn new(channels: Arc<WebSocketChannels>, backbone: Arc<dyn Backbone>, topic: &str) -> Self {
        let first = match backbone.subscribe(topic).await {
            Ok(payloads) => Some(payloads),
            Err(e) => {
                error!(topic = %topic, "Failed to subscribe to backbone: {e}");
                None
            }
        };
        let listener = tokio::spawn(listen(channels, backbone.clone(), topic.to_string(), first));

        info!(topic = %topic, "Cross-process broker started");
        Self {
            backbone,
            topic: topic.to_string(),
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Sends `message` to `destination` on every process. Failures are logged.
    pub async fn dispatch(&self, destination: Destination, message: ServerMessage) {
        let envelope = Envelope::new(destination, message);
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!(channel = %envelope.channel, "Failed to serialize envelope: {e}");
                return;
            }
        };
        if let Err(e) = self.backbone.publish(&self.topic, payload).await {
            error!(channel = %envelope.channel, "Failed to publish on backbone: {e}");
        }
    }

    /// Stops listening and releases the backbone connections. Must run before
    /// the channel registry is closed.
    pub async fn close(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.abort();
        }
        self.backbone.close().await;
        info!(topic = %self.topic, "Cross-process broker closed");
    }
}

impl fmt::Debug for MultiInstanceChannelsBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiInstanceChannelsBroker")
            .field("topic", &self.topic)
            .finish()
    }
}

/// Delivery loop. Reconnecting is left to the backbone client; a failed
/// subscribe is retried after [`RESUBSCRIBE_DELAY`].
async fn listen(
    channels: Arc<WebSocketChannels>,
    backbone: Arc<dyn Backbone>,
    topic: String,
    mut current: Option<PayloadStream>,
) {
    loop {
        let mut payloads = match current.take() {
            Some(payloads) => payloads,
            None => match backbone.subscribe(&topic).await {
                Ok(payloads) => {
                    info!(topic = %topic, "Resubscribed to backbone");
                    payloads
                }
                Err(BackboneError::Closed) => {
                    debug!(topic = %topic, "Backbone closed, listener stopped");
                    return;
                }
                Err(e) => {
                    warn!(topic = %topic, "Backbone subscribe failed: {e}");
                    tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                    continue;
                }
            },
        };
        while let Some(payload) = payloads.next().await {
            deliver(&channels, &payload);
        }
        warn!(topic = %topic, "Backbone subscription ended, resubscribing");
    }
}

/// Delivers one backbone payload to the local registry. Malformed payloads are
/// logged and dropped.
pub(crate) fn deliver(channels: &WebSocketChannels, payload: &str) -> bool {
    let envelope: Envelope = match serde_json::from_str(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Dropping malformed backbone message: {e}");
            return false;
        }
    };
    match envelope.destination() {
        Destination::Broadcast => channels.broadcast(&envelope.data),
        Destination::Channel(name) => {
            let delivered = channels.channel_send(&name, &envelope.data);
            if !delivered {
                debug!(channel = %name, "Backbone message not fully delivered");
            }
            delivered
        }
    }
}
