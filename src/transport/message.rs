//! Wire codec for the `notif` realm.
//!
//! Client frames are tagged by `action`, server frames by `type`. Decoding is
//! schema-validating and fails closed: [`parse`] yields `None` for anything
//! that is not a complete, well-typed message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::error::{ErrorDescriptor, NotifError};

/// Realm marker carried by every frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Realm {
    #[default]
    #[serde(rename = "notif")]
    Notif,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub realm: Realm,
    #[serde(flatten)]
    pub action: ClientAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientAction {
    Subscribe { topic: String, channel: String },
    SubscribeOnly { topic: String, channel: String },
    Unsubscribe { topic: String, channel: String },
    Disconnect,
}

impl ClientMessage {
    pub fn new(action: ClientAction) -> Self {
        Self {
            realm: Realm::Notif,
            action,
        }
    }

    pub fn subscribe(topic: &str, channel: &str) -> Self {
        Self::new(ClientAction::Subscribe {
            topic: topic.to_string(),
            channel: channel.to_string(),
        })
    }

    pub fn subscribe_only(topic: &str, channel: &str) -> Self {
        Self::new(ClientAction::SubscribeOnly {
            topic: topic.to_string(),
            channel: channel.to_string(),
        })
    }

    pub fn unsubscribe(topic: &str, channel: &str) -> Self {
        Self::new(ClientAction::Unsubscribe {
            topic: topic.to_string(),
            channel: channel.to_string(),
        })
    }

    pub fn disconnect() -> Self {
        Self::new(ClientAction::Disconnect)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub realm: Realm,
    #[serde(flatten)]
    pub payload: ServerPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerPayload {
    Response {
        status: ResponseStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorDescriptor>,
        /// The request as the client sent it, unknown fields included.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request: Option<Value>,
    },
    Update {
        topic: String,
        channel: String,
        body: Value,
    },
    Info {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extra: Option<Value>,
    },
}

impl ServerMessage {
    fn new(payload: ServerPayload) -> Self {
        Self {
            realm: Realm::Notif,
            payload,
        }
    }

    /// Acknowledges `request`.
    pub fn success(request: Value) -> Self {
        Self::new(ServerPayload::Response {
            status: ResponseStatus::Success,
            error: None,
            request: Some(request),
        })
    }

    /// Error response; `request` is `None` when the frame could not be parsed.
    pub fn error(error: &NotifError, request: Option<Value>) -> Self {
        Self::new(ServerPayload::Response {
            status: ResponseStatus::Error,
            error: Some(error.descriptor()),
            request,
        })
    }

    pub fn update(topic: &str, channel: &str, body: Value) -> Self {
        Self::new(ServerPayload::Update {
            topic: topic.to_string(),
            channel: channel.to_string(),
            body,
        })
    }

    pub fn info(message: impl Into<String>, extra: Option<Value>) -> Self {
        Self::new(ServerPayload::Info {
            message: message.into(),
            extra,
        })
    }
}

/// Encodes a server message for the wire.
pub fn serialize(message: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

/// A decoded client frame together with the JSON it was decoded from.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRequest {
    pub message: ClientMessage,
    /// Echoed back verbatim in the response.
    pub raw: Value,
}

/// Decodes a client frame. Returns `None` when the frame is not valid JSON or
/// does not match any client message shape.
pub fn parse(data: &[u8]) -> Option<ClientMessage> {
    parse_request(data).map(|request| request.message)
}

/// Like [`parse`], keeping the original JSON for the response echo.
pub fn parse_request(data: &[u8]) -> Option<ClientRequest> {
    let raw: Value = serde_json::from_slice(data).ok()?;
    let message = ClientMessage::deserialize(&raw).ok()?;
    Some(ClientRequest { message, raw })
}
