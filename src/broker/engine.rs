//! Channel registry engine
//!
//! This module contains the in-memory registry responsible for:
//! - tracking live connections and the channels each one is subscribed to
//! - tracking channels and their subscriber sets
//! - fanning out server messages to subscribers
//! - the heartbeat: probing connections, evicting unresponsive ones and
//!   collecting empty channels
//!
//! Concurrency and usage notes:
//! - All state sits behind one mutex. Every public method takes the lock for
//!   its whole duration, so compound operations such as
//!   [`WebSocketChannels::client_subscribe_only`] are atomic with respect to
//!   concurrent sends.
//! - Sends never block: they `try_send` on each connection's bounded queue,
//!   and no network I/O ever happens while the lock is held.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::channel::Channel;
use crate::client::{Client, ClientId};
use crate::transport::message::{self, ServerMessage};

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    /// Unanswered probes tolerated before a connection is evicted.
    pub max_missed_probes: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_missed_probes: 1,
        }
    }
}

/// What one heartbeat tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub probed: usize,
    pub evicted: Vec<ClientId>,
    pub channels_removed: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelsStats {
    pub clients: usize,
    pub channels: usize,
}

#[derive(Debug)]
struct TrackedClient {
    client: Client,
    subscriptions: HashSet<String>,
    missed_probes: u32,
}

#[derive(Debug, Default)]
struct Registry {
    channels: HashMap<String, Channel>,
    clients: HashMap<ClientId, TrackedClient>,
}

impl Registry {
    fn register(&mut self, client: Client) {
        let id = client.id.clone();
        self.clients.insert(
            id,
            TrackedClient {
                client,
                subscriptions: HashSet::new(),
                missed_probes: 0,
            },
        );
    }

    fn remove(&mut self, id: &ClientId) -> bool {
        let Some(tracked) = self.clients.remove(id) else {
            return false;
        };
        for name in tracked.subscriptions {
            let collectable = match self.channels.get_mut(&name) {
                Some(channel) => {
                    channel.unsubscribe(id);
                    channel.is_collectable()
                }
                None => false,
            };
            if collectable {
                self.channels.remove(&name);
                debug!(channel = %name, "Removed empty channel");
            }
        }
        true
    }

    fn delete_channel(&mut self, name: &str, only_if_empty: bool) -> bool {
        match self.channels.get(name) {
            None => return false,
            Some(channel) if only_if_empty && !channel.is_collectable() => return false,
            Some(_) => {}
        }
        let Some(channel) = self.channels.remove(name) else {
            return false;
        };
        for id in &channel.subscribers {
            if let Some(tracked) = self.clients.get_mut(id) {
                tracked.subscriptions.remove(name);
            }
        }
        true
    }

    fn subscribe(&mut self, id: &ClientId, name: &str) -> bool {
        let (Some(channel), Some(tracked)) = (self.channels.get_mut(name), self.clients.get_mut(id))
        else {
            return false;
        };
        channel.subscribe(id.clone());
        tracked.subscriptions.insert(name.to_string());
        true
    }

    fn unsubscribe(&mut self, id: &ClientId, name: &str) -> bool {
        let (Some(channel), Some(tracked)) = (self.channels.get_mut(name), self.clients.get_mut(id))
        else {
            return false;
        };
        let was_subscribed = channel.unsubscribe(id);
        tracked.subscriptions.remove(name);
        was_subscribed
    }

    fn unsubscribe_all(&mut self, id: &ClientId) {
        let Some(tracked) = self.clients.get_mut(id) else {
            return;
        };
        for name in tracked.subscriptions.drain() {
            if let Some(channel) = self.channels.get_mut(&name) {
                channel.unsubscribe(id);
            }
        }
    }

    fn send_to<'a>(&self, ids: impl Iterator<Item = &'a ClientId>, frame: &WsMessage) -> bool {
        let mut delivered = true;
        for id in ids {
            let Some(tracked) = self.clients.get(id) else {
                warn!(client_id = %id, "No client registered with id");
                delivered = false;
                continue;
            };
            // each send is independent; one dead socket must not starve the rest
            if !tracked.client.is_writable() || !tracked.client.send(frame.clone()) {
                debug!(client_id = %id, "Client not writable, message dropped");
                delivered = false;
            }
        }
        delivered
    }
}

/// Registry of channels and connections for one process.
#[derive(Debug, Default)]
pub struct WebSocketChannels {
    state: Mutex<Registry>,
    heartbeat: HeartbeatConfig,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketChannels {
    /// A `max_missed_probes` of zero would evict every client on the first
    /// tick; it is raised to one.
    pub fn new(mut heartbeat: HeartbeatConfig) -> Self {
        if heartbeat.max_missed_probes == 0 {
            warn!("max_missed_probes of 0 raised to 1");
            heartbeat.max_missed_probes = 1;
        }
        Self {
            state: Mutex::new(Registry::default()),
            heartbeat,
            heartbeat_task: Mutex::new(None),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        self.heartbeat
    }

    /// Starts tracking `client` with no subscriptions. Registering the same id
    /// twice replaces the previous tracking state.
    pub fn client_register(&self, client: Client) {
        debug!(client_id = %client.id, "Client registered");
        self.registry().register(client);
    }

    /// Unsubscribes the client everywhere, deletes channels this empties and
    /// stops tracking it. Returns whether the client was tracked.
    pub fn client_remove(&self, id: &ClientId) -> bool {
        let removed = self.registry().remove(id);
        if removed {
            debug!(client_id = %id, "Client removed");
        }
        removed
    }

    /// Records a liveness acknowledgement (pong) from the client.
    pub fn client_heartbeat(&self, id: &ClientId) {
        if let Some(tracked) = self.registry().clients.get_mut(id) {
            tracked.missed_probes = 0;
        }
    }

    /// Creates an empty channel, replacing any channel with the same name.
    pub fn channel_create(&self, name: &str, remove_if_empty: bool) {
        let mut registry = self.registry();
        if let Some(old) = registry
            .channels
            .insert(name.to_string(), Channel::new(name, remove_if_empty))
        {
            for id in &old.subscribers {
                if let Some(tracked) = registry.clients.get_mut(id) {
                    tracked.subscriptions.remove(name);
                }
            }
        }
    }

    /// Creates the channel unless it exists. Returns `true` if it was created.
    pub fn channel_create_if_absent(&self, name: &str, remove_if_empty: bool) -> bool {
        let mut registry = self.registry();
        if registry.channels.contains_key(name) {
            return false;
        }
        registry
            .channels
            .insert(name.to_string(), Channel::new(name, remove_if_empty));
        true
    }

    /// Removes a channel and detaches it from its subscribers. With
    /// `only_if_empty`, only empty `remove_if_empty` channels are deleted.
    pub fn channel_delete(&self, name: &str, only_if_empty: bool) -> bool {
        self.registry().delete_channel(name, only_if_empty)
    }

    pub fn channel_exists(&self, name: &str) -> bool {
        self.registry().channels.contains_key(name)
    }

    /// Subscriber ids of `name`, or `None` if there is no such channel.
    pub fn channel_subscribers(&self, name: &str) -> Option<HashSet<ClientId>> {
        self.registry()
            .channels
            .get(name)
            .map(|channel| channel.subscribers.clone())
    }

    /// Channel names `id` is subscribed to, or `None` if it is not tracked.
    pub fn client_subscriptions(&self, id: &ClientId) -> Option<HashSet<String>> {
        self.registry()
            .clients
            .get(id)
            .map(|tracked| tracked.subscriptions.clone())
    }

    pub fn client_subscribe(&self, id: &ClientId, name: &str) -> bool {
        self.registry().subscribe(id, name)
    }

    /// Replaces all of the client's subscriptions with `name`, under one lock.
    pub fn client_subscribe_only(&self, id: &ClientId, name: &str) -> bool {
        let mut registry = self.registry();
        if !registry.channels.contains_key(name) || !registry.clients.contains_key(id) {
            return false;
        }
        registry.unsubscribe_all(id);
        registry.subscribe(id, name)
    }

    /// Creates `name` as a collectable channel if it is missing and
    /// subscribes `id` to it, all under one lock so no concurrent delete or
    /// heartbeat sweep can drop the channel in between. With `exclusive` the
    /// client's other subscriptions are dropped first. Returns `false`, and
    /// creates nothing, if the client is not tracked.
    pub fn client_subscribe_creating(&self, id: &ClientId, name: &str, exclusive: bool) -> bool {
        let mut registry = self.registry();
        if !registry.clients.contains_key(id) {
            return false;
        }
        registry
            .channels
            .entry(name.to_string())
            .or_insert_with(|| Channel::new(name, true));
        if exclusive {
            registry.unsubscribe_all(id);
        }
        registry.subscribe(id, name)
    }

    pub fn client_unsubscribe(&self, id: &ClientId, name: &str) -> bool {
        self.registry().unsubscribe(id, name)
    }

    /// Sends `message` to every subscriber of `name`. Returns `false` if the
    /// channel does not exist or any single send failed.
    pub fn channel_send(&self, name: &str, message: &ServerMessage) -> bool {
        let registry = self.registry();
        let Some(channel) = registry.channels.get(name) else {
            debug!(channel = %name, "Channel not found, message dropped");
            return false;
        };
        let Some(frame) = encode(message) else {
            return false;
        };
        registry.send_to(channel.subscribers.iter(), &frame)
    }

    /// Sends `message` to every tracked connection.
    pub fn broadcast(&self, message: &ServerMessage) -> bool {
        let registry = self.registry();
        let Some(frame) = encode(message) else {
            return false;
        };
        registry.send_to(registry.clients.keys(), &frame)
    }

    pub fn stats(&self) -> ChannelsStats {
        let registry = self.registry();
        ChannelsStats {
            clients: registry.clients.len(),
            channels: registry.channels.len(),
        }
    }

    /// One heartbeat pass: evict connections that left too many probes
    /// unanswered, probe the rest, then drop empty collectable channels.
    pub fn heartbeat_tick(&self) -> HeartbeatReport {
        let mut registry = self.registry();
        let mut report = HeartbeatReport::default();

        for (id, tracked) in registry.clients.iter_mut() {
            if tracked.missed_probes >= self.heartbeat.max_missed_probes {
                // the transport tears the socket down
                tracked.client.close();
                report.evicted.push(id.clone());
                continue;
            }
            tracked.missed_probes += 1;
            let _ = tracked.client.send(WsMessage::Ping(Default::default()));
            report.probed += 1;
        }

        for id in &report.evicted {
            registry.remove(id);
            info!(client_id = %id, "Evicted unresponsive client");
        }

        registry.channels.retain(|name, channel| {
            if channel.is_collectable() {
                report.channels_removed.push(name.clone());
                false
            } else {
                true
            }
        });

        report
    }

    /// Spawns the periodic heartbeat. The task stops on [`Self::close`] or
    /// once the registry is dropped.
    pub fn start_heartbeat(self: &Arc<Self>) {
        let period = self.heartbeat.interval;
        let registry: Weak<Self> = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(channels) = registry.upgrade() else {
                    break;
                };
                let report = channels.heartbeat_tick();
                if !report.evicted.is_empty() || !report.channels_removed.is_empty() {
                    debug!(
                        probed = report.probed,
                        evicted = report.evicted.len(),
                        channels_removed = report.channels_removed.len(),
                        "Heartbeat tick"
                    );
                }
            }
        });

        let previous = self
            .heartbeat_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stops the heartbeat. Called once at shutdown.
    pub fn close(&self) {
        let task = self
            .heartbeat_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        info!("Channel registry closed");
    }
}

fn encode(message: &ServerMessage) -> Option<WsMessage> {
    match message::serialize(message) {
        Ok(json) => Some(WsMessage::text(json)),
        Err(e) => {
            warn!("Failed to serialize message: {e}");
            None
        }
    }
}
