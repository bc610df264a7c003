//! Protocol handler
//!
//! Translates client frames into registry operations and replies to the
//! originating connection only. Also exposes the publish operations used by
//! business logic.
//!
//! Validator calls are the only suspension point while handling a request.
//! No registry lock is held across them, so a slow validator delays only the
//! connection that triggered it.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::backbone::{Destination, MultiInstanceChannelsBroker};
use crate::broker::{WebSocketChannels, scoped_channel_name};
use crate::client::Client;
use crate::service::validator::{SubscriptionRequest, SubscriptionValidator, TopicValidators};
use crate::transport::message::{self, ClientAction, ClientRequest, ServerMessage};
use crate::utils::error::{BrokerResult, NotifError};

#[derive(Debug)]
pub struct WebsocketService {
    channels: Arc<WebSocketChannels>,
    validators: TopicValidators,
    broker: Arc<MultiInstanceChannelsBroker>,
}

impl WebsocketService {
    pub fn new(channels: Arc<WebSocketChannels>, broker: Arc<MultiInstanceChannelsBroker>) -> Self {
        Self {
            channels,
            validators: TopicValidators::new(),
            broker,
        }
    }

    pub fn channels(&self) -> &Arc<WebSocketChannels> {
        &self.channels
    }

    /// Registers the validator gating `topic`.
    ///
    /// Registering a topic twice is a wiring error: the call fails and the
    /// caller is expected to abort startup.
    pub fn register<V>(&self, topic: &str, validator: V) -> BrokerResult<()>
    where
        V: SubscriptionValidator + 'static,
    {
        self.validators.register(topic, validator)?;
        debug!(topic = %topic, "Registered subscription validator");
        Ok(())
    }

    /// Publishes an update to `topic/channel` on every process.
    pub async fn publish(&self, topic: &str, channel: &str, body: Value) {
        let name = scoped_channel_name(topic, channel);
        let message = ServerMessage::update(topic, channel, body);
        self.broker
            .dispatch(Destination::Channel(name), message)
            .await;
    }

    /// Publishes to subscribers connected to this process only.
    ///
    /// Subscribers on other processes never see these updates; use only in
    /// single-process deployments and tests.
    pub fn publish_local(&self, topic: &str, channel: &str, body: Value) -> bool {
        let name = scoped_channel_name(topic, channel);
        let message = ServerMessage::update(topic, channel, body);
        self.channels.channel_send(&name, &message)
    }

    /// Sends an `info` message to every client on every process.
    pub async fn broadcast(&self, text: &str, extra: Option<Value>) {
        self.broker
            .dispatch(Destination::Broadcast, ServerMessage::info(text, extra))
            .await;
    }

    /// Handles one raw frame from `client`.
    pub async fn handle_message(&self, client: &Client, data: &[u8]) {
        let reply = match message::parse_request(data) {
            Some(request) => self.handle_request(client, request).await,
            None => {
                debug!(client_id = %client.id, "Unparseable client message");
                Some(ServerMessage::error(&NotifError::BadRequest, None))
            }
        };

        if let Some(reply) = reply {
            send_reply(client, &reply);
        }
    }

    /// Called by the transport once the connection is gone.
    pub fn handle_close(&self, client: &Client) {
        self.channels.client_remove(&client.id);
    }

    async fn handle_request(&self, client: &Client, request: ClientRequest) -> Option<ServerMessage> {
        let outcome = match &request.message.action {
            ClientAction::Subscribe { topic, channel } => {
                self.subscribe(client, topic, channel, false).await
            }
            ClientAction::SubscribeOnly { topic, channel } => {
                self.subscribe(client, topic, channel, true).await
            }
            ClientAction::Unsubscribe { topic, channel } => self.unsubscribe(client, topic, channel),
            ClientAction::Disconnect => {
                self.channels.client_remove(&client.id);
                // an untracked socket must not stay open
                client.close();
                debug!(client_id = %client.id, "Client disconnected");
                return None;
            }
        };

        Some(match outcome {
            Ok(()) => ServerMessage::success(request.raw),
            Err(e) => {
                debug!(client_id = %client.id, error = %e, "Request rejected");
                ServerMessage::error(&e, Some(request.raw))
            }
        })
    }

    async fn subscribe(
        &self,
        client: &Client,
        topic: &str,
        channel: &str,
        exclusive: bool,
    ) -> Result<(), NotifError> {
        let Some(identity) = client.identity.clone() else {
            return Err(NotifError::Unauthorized);
        };

        let validator = self
            .validators
            .get(topic)
            .ok_or_else(|| NotifError::not_found(format!("topic '{topic}' not found")))?;

        validator
            .validate(SubscriptionRequest {
                channel: channel.to_string(),
                identity,
            })
            .await?;

        let name = scoped_channel_name(topic, channel);
        if self
            .channels
            .client_subscribe_creating(&client.id, &name, exclusive)
        {
            debug!(client_id = %client.id, channel = %name, exclusive, "Client subscribed");
            Ok(())
        } else {
            Err(NotifError::not_found(format!("client '{}' not found", client.id)))
        }
    }

    fn unsubscribe(&self, client: &Client, topic: &str, channel: &str) -> Result<(), NotifError> {
        let name = scoped_channel_name(topic, channel);
        let unsubscribed = self.channels.client_unsubscribe(&client.id, &name);
        // shrink promptly; the heartbeat sweep catches anything missed here
        self.channels.channel_delete(&name, true);

        if unsubscribed {
            debug!(client_id = %client.id, channel = %name, "Client unsubscribed");
            Ok(())
        } else {
            Err(NotifError::not_found(format!(
                "client '{}' is not subscribed to '{name}'",
                client.id
            )))
        }
    }
}

fn send_reply(client: &Client, reply: &ServerMessage) {
    match message::serialize(reply) {
        Ok(json) => {
            if !client.send(WsMessage::text(json)) {
                debug!(client_id = %client.id, "Reply dropped, connection closed");
            }
        }
        Err(e) => warn!(client_id = %client.id, "Failed to serialize reply: {e}"),
    }
}
