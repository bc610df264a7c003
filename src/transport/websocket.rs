//! WebSocket transport
//!
//! This file implements the WebSocket binding of the notification service.
//! Responsibilities:
//! - Accept TCP connections and complete the upgrade on the configured path
//! - Resolve the connection's identity through the [`Authenticator`]
//! - Register a `Client` with the channel registry and remove it on close
//! - Queue text frames for the protocol handler and feed pongs to the heartbeat
//! - Tear the socket down when the connection is evicted or disconnects

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::accept_hdr_async;
use tracing::{debug, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::protocol::Message as WsMessage;

use crate::client::Client;
use crate::config::Settings;
use crate::service::WebsocketService;
use crate::transport::auth::Authenticator;
use crate::utils::error::BrokerResult;

/// How long a closing connection may take to flush its queued frames.
const WRITER_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
struct ConnectionLimits {
    max_connections: usize,
    queue_capacity: usize,
}

pub async fn start_websocket_server(
    addr: &str,
    service: Arc<WebsocketService>,
    settings: Settings,
    authenticator: Arc<dyn Authenticator>,
) -> BrokerResult<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket server listening on ws://{addr}{}", settings.server.path);
    serve(listener, service, settings, authenticator).await;
    Ok(())
}

/// Accepts connections on an already bound listener until the task is dropped.
pub async fn serve(
    listener: TcpListener,
    service: Arc<WebsocketService>,
    settings: Settings,
    authenticator: Arc<dyn Authenticator>,
) {
    let path: Arc<str> = Arc::from(settings.server.path.as_str());
    let limits = ConnectionLimits {
        max_connections: settings.broker.max_connections,
        queue_capacity: settings.broker.client_queue_capacity.max(1),
    };

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {e}");
                continue;
            }
        };
        debug!(%peer, "TCP connection accepted");

        let service = service.clone();
        let authenticator = authenticator.clone();
        let path = path.clone();
        tokio::spawn(async move {
            handle_connection(stream, service, &path, limits, authenticator.as_ref()).await;
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    service: Arc<WebsocketService>,
    path: &str,
    limits: ConnectionLimits,
    authenticator: &dyn Authenticator,
) {
    let mut identity = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if !path_matches(request.uri().path(), path) {
            return Err(error_response(StatusCode::NOT_FOUND, "not found"));
        }
        if service.channels().stats().clients >= limits.max_connections {
            return Err(error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "too many connections",
            ));
        }
        identity = authenticator.authenticate(request);
        Ok(response)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("WebSocket handshake error: {e}");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(limits.queue_capacity);
    let client = Client::with_identity(tx, identity);
    let client_id = client.id.clone();

    // register before reading anything
    service.channels().client_register(client.clone());
    info!(
        client_id = %client_id,
        authenticated = client.identity.is_some(),
        "Client connected"
    );

    let (closed_tx, mut closed_rx) = oneshot::channel::<()>();
    let mut writer = {
        let client_id = client_id.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = msg.is_close();
                if let Err(e) = ws_sender.send(msg).await {
                    debug!(client_id = %client_id, "Failed to send message: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = closed_tx.send(());
            debug!(client_id = %client_id, "Send loop closed");
        })
    };

    // requests run in order on their own task, so a pending validator never
    // stops the read loop from seeing pongs
    let (request_tx, mut request_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let worker = {
        let service = service.clone();
        let client = client.clone();
        tokio::spawn(async move {
            while let Some(data) = request_rx.recv().await {
                service.handle_message(&client, &data).await;
            }
        })
    };

    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = request_tx.send(text.as_bytes().to_vec());
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    let _ = request_tx.send(data.to_vec());
                }
                Some(Ok(WsMessage::Pong(_))) => {
                    service.channels().client_heartbeat(&client_id);
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(client_id = %client_id, "WebSocket read error: {e}");
                    break;
                }
            },
            // evicted by the heartbeat or disconnected on request
            _ = client.closed() => break,
            // the writer stops on a dead socket
            _ = &mut closed_rx => break,
        }
    }

    drop(request_tx);
    worker.abort();
    service.handle_close(&client);
    drop(client);
    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
    info!(client_id = %client_id, "Client disconnected");
}

fn path_matches(requested: &str, prefix: &str) -> bool {
    requested.trim_end_matches('/') == prefix.trim_end_matches('/')
}

fn error_response(status: StatusCode, body: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(body.to_string()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::path_matches;

    #[test]
    fn test_path_matches() {
        assert!(path_matches("/ws", "/ws"));
        assert!(path_matches("/ws/", "/ws"));
        assert!(!path_matches("/", "/ws"));
        assert!(!path_matches("/wsx", "/ws"));
    }
}
