use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::sync::mpsc::Sender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

pub type ClientId = String;

/// Identity resolved by the authenticator before the upgrade completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Member id (the `sub` claim).
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// Represents a connected WebSocket client.
///
/// Each client is uniquely identified by an `id` and has a bounded channel
/// (`sender`) drained by the connection's writer task. Cloning a `Client`
/// clones the handle, not the connection.
#[derive(Debug, Clone)]
pub struct Client {
    /// Unique identifier for the connection.
    pub id: ClientId,

    /// Channel to send WebSocket frames to the client.
    pub sender: Sender<WsMessage>,

    /// `None` for anonymous connections.
    pub identity: Option<Identity>,

    /// Signalled when the server wants the connection torn down.
    closer: Arc<Notify>,
}

impl Client {
    pub fn new(sender: Sender<WsMessage>) -> Self {
        Self {
            id: format!("client-{}", Uuid::new_v4()),
            sender,
            identity: None,
            closer: Arc::new(Notify::new()),
        }
    }

    pub fn with_identity(sender: Sender<WsMessage>, identity: Option<Identity>) -> Self {
        Self {
            identity,
            ..Self::new(sender)
        }
    }

    /// Queues a frame without waiting. Fails when the writer side is gone or
    /// the queue is full.
    pub fn send(&self, msg: WsMessage) -> bool {
        self.sender.try_send(msg).is_ok()
    }

    /// Open and with room for at least one more frame.
    pub fn is_writable(&self) -> bool {
        !self.sender.is_closed() && self.sender.capacity() > 0
    }

    /// Asks the transport to close the connection. A close frame is queued
    /// when there is room; the socket is torn down either way.
    pub fn close(&self) {
        let _ = self.sender.try_send(WsMessage::Close(None));
        self.closer.notify_one();
    }

    /// Resolves once [`Self::close`] was called on any clone of this handle.
    pub async fn closed(&self) {
        self.closer.notified().await;
    }
}
