//! CLI for NotifSub
//!
//! Starts the WebSocket notification server with the configuration found at
//! `--config` (plus `NOTIF_*` environment overrides) and runs until Ctrl-C.

use std::sync::Arc;

use clap::Parser;
use notifsub::backbone::{Backbone, MemoryBackbone, MultiInstanceChannelsBroker, RedisBackbone};
use notifsub::broker::WebSocketChannels;
use notifsub::config::load_config_from;
use notifsub::service::{AllowAuthenticated, WebsocketService};
use notifsub::transport::auth::{Anonymous, Authenticator, JwtAuthenticator};
use notifsub::transport::websocket::start_websocket_server;
use notifsub::utils::error::BrokerError;
use notifsub::utils::logging;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "notifsub", about = "WebSocket notification channel server")]
struct Args {
    /// Configuration file, extension optional
    #[arg(long, default_value = "config/default")]
    config: String,

    /// Overrides `logging.level` from the configuration
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), BrokerError> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let settings = load_config_from(&args.config)?;
    logging::init(args.log_level.as_deref().unwrap_or(&settings.logging.level));

    let channels = Arc::new(WebSocketChannels::new(settings.broker.heartbeat()));
    channels.start_heartbeat();

    let backbone: Arc<dyn Backbone> = match &settings.backbone.redis_url {
        Some(url) => Arc::new(RedisBackbone::new(url)?),
        None => {
            warn!("No backbone.redis_url configured, publishes stay within this process");
            Arc::new(MemoryBackbone::default())
        }
    };
    let broker = Arc::new(
        MultiInstanceChannelsBroker::new(channels.clone(), backbone, &settings.backbone.channel)
            .await,
    );

    let service = Arc::new(WebsocketService::new(channels.clone(), broker.clone()));
    for topic in &settings.topics.open {
        service.register(topic, AllowAuthenticated)?;
    }

    let authenticator: Arc<dyn Authenticator> = match &settings.server.jwt_secret {
        Some(secret) => Arc::new(JwtAuthenticator::new(secret)),
        None => {
            warn!("No server.jwt_secret configured, every connection is anonymous");
            Arc::new(Anonymous)
        }
    };

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let outcome = tokio::select! {
        result = start_websocket_server(&addr, service, settings.clone(), authenticator) => {
            if let Err(e) = &result {
                error!("WebSocket server failed: {e}");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            Ok(())
        }
    };

    broker.close().await;
    channels.close();
    outcome
}
