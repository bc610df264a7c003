mod settings;

use std::time::Duration;

use crate::broker::HeartbeatConfig;
use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BackboneSettings, BrokerSettings, LoggingSettings, ServerSettings, Settings, TopicSettings,
};

/// Loads `config/default` plus `NOTIF_*` environment variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Loads the configuration file at `path` (extension optional, file optional)
/// and environment variables such as `NOTIF_SERVER__PORT`, merged over the
/// defaults.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("NOTIF")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("topics.open")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;
    let settings = partial.merge(Settings::default());
    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if settings.broker.heartbeat_interval_secs < 1 {
        return Err(ConfigError::Message(
            "broker.heartbeat_interval_secs must be at least 1".to_string(),
        ));
    }
    if settings.broker.max_missed_probes < 1 {
        return Err(ConfigError::Message(
            "broker.max_missed_probes must be at least 1".to_string(),
        ));
    }
    if settings.broker.client_queue_capacity < 1 {
        return Err(ConfigError::Message(
            "broker.client_queue_capacity must be at least 1".to_string(),
        ));
    }
    if !settings.server.path.starts_with('/') {
        return Err(ConfigError::Message(format!(
            "server.path must start with '/', got '{}'",
            settings.server.path
        )));
    }
    Ok(())
}

impl BrokerSettings {
    pub fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_secs(self.heartbeat_interval_secs),
            max_missed_probes: self.max_missed_probes,
        }
    }
}
