use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub backbone: BackboneSettings,
    pub logging: LoggingSettings,
    pub topics: TopicSettings,
}

/// Configuration settings for the server.
///
/// Defines where the server binds, the upgrade path and the secret used to
/// verify bearer tokens. Without a secret every connection is anonymous.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub jwt_secret: Option<String>,
}

/// Configuration settings for the channel registry.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub max_connections: usize,
    pub heartbeat_interval_secs: u64,
    pub max_missed_probes: u32,
    /// Outbound frames buffered per connection before it counts as not writable.
    pub client_queue_capacity: usize,
}

/// Cross-process pub/sub settings.
///
/// Without `redis_url` an in-process bus is used, which only reaches clients
/// of this process.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BackboneSettings {
    pub redis_url: Option<String>,
    pub channel: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Topics the binary opens to any authenticated member.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct TopicSettings {
    pub open: Vec<String>,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub backbone: Option<PartialBackboneSettings>,
    pub logging: Option<PartialLoggingSettings>,
    pub topics: Option<PartialTopicSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub max_connections: Option<usize>,
    pub heartbeat_interval_secs: Option<u64>,
    pub max_missed_probes: Option<u32>,
    pub client_queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBackboneSettings {
    pub redis_url: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialTopicSettings {
    pub open: Option<Vec<String>>,
}

/// Provides default values for `Settings`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                path: "/ws".to_string(),
                jwt_secret: None,
            },
            broker: BrokerSettings {
                max_connections: 1000,
                heartbeat_interval_secs: 30,
                max_missed_probes: 1,
                client_queue_capacity: 256,
            },
            backbone: BackboneSettings {
                redis_url: None,
                channel: "notifications".to_string(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
            topics: TopicSettings::default(),
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let backbone = self.backbone.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();
        let topics = self.topics.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(defaults.server.host),
                port: server.port.unwrap_or(defaults.server.port),
                path: server.path.unwrap_or(defaults.server.path),
                jwt_secret: server.jwt_secret.or(defaults.server.jwt_secret),
            },
            broker: BrokerSettings {
                max_connections: broker
                    .max_connections
                    .unwrap_or(defaults.broker.max_connections),
                heartbeat_interval_secs: broker
                    .heartbeat_interval_secs
                    .unwrap_or(defaults.broker.heartbeat_interval_secs),
                max_missed_probes: broker
                    .max_missed_probes
                    .unwrap_or(defaults.broker.max_missed_probes),
                client_queue_capacity: broker
                    .client_queue_capacity
                    .unwrap_or(defaults.broker.client_queue_capacity),
            },
            backbone: BackboneSettings {
                redis_url: backbone.redis_url.or(defaults.backbone.redis_url),
                channel: backbone.channel.unwrap_or(defaults.backbone.channel),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(defaults.logging.level),
            },
            topics: TopicSettings {
                open: topics.open.unwrap_or(defaults.topics.open),
            },
        }
    }
}
