use std::collections::HashSet;

use crate::client::ClientId;

/// Reserved scoped name delivered to every connected client.
pub const BROADCAST: &str = "broadcast";

/// Builds the registry key for `channel` inside `topic`.
///
/// Keys are always `topic/channel`, so two topics can never collide and no
/// scoped name can equal [`BROADCAST`].
pub fn scoped_channel_name(topic: &str, channel: &str) -> String {
    format!("{topic}/{channel}")
}

/// A named fan-out group.
///
/// Channels hold subscriber ids only; the connections themselves are owned
/// by the registry's client table.
#[derive(Debug)]
pub struct Channel {
    pub name: String,
    pub subscribers: HashSet<ClientId>,
    /// Channels created by a subscription request are dropped once empty.
    pub remove_if_empty: bool,
}

impl Channel {
    pub fn new(name: &str, remove_if_empty: bool) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashSet::new(),
            remove_if_empty,
        }
    }

    /// Returns `false` if `id` was already subscribed.
    pub fn subscribe(&mut self, id: ClientId) -> bool {
        self.subscribers.insert(id)
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: &ClientId) -> bool {
        self.subscribers.remove(id)
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Empty and created for a subscription.
    pub fn is_collectable(&self) -> bool {
        self.remove_if_empty && self.is_empty()
    }
}
