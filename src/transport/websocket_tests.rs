use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::backbone::{MemoryBackbone, MultiInstanceChannelsBroker};
use crate::broker::WebSocketChannels;
use crate::config::Settings;
use crate::service::{AllowAuthenticated, SubscriptionRequest, WebsocketService};
use crate::transport::auth::{Anonymous, Authenticator, Claims, JwtAuthenticator};
use crate::transport::message::ClientMessage;
use crate::transport::websocket::serve;
use crate::utils::error::NotifError;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "test_secret";

async fn start_server(
    settings: Settings,
    backbone: MemoryBackbone,
    authenticator: Arc<dyn Authenticator>,
) -> (String, Arc<WebsocketService>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let channels = Arc::new(WebSocketChannels::new(settings.broker.heartbeat()));
    let broker = MultiInstanceChannelsBroker::new(
        channels.clone(),
        Arc::new(backbone),
        &settings.backbone.channel,
    )
    .await;
    let service = Arc::new(WebsocketService::new(channels, Arc::new(broker)));
    service.register("items", AllowAuthenticated).unwrap();

    tokio::spawn(serve(listener, service.clone(), settings, authenticator));
    (format!("ws://{addr}/ws"), service)
}

async fn start_default_server() -> (String, Arc<WebsocketService>) {
    start_server(
        Settings::default(),
        MemoryBackbone::default(),
        Arc::new(JwtAuthenticator::new(SECRET)),
    )
    .await
}

fn token_for(member: &str) -> String {
    let claims = Claims {
        sub: member.to_string(),
        name: None,
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn connect_as(url: &str, member: &str) -> Ws {
    let (ws, _) = connect_async(format!("{url}?token={}", token_for(member)))
        .await
        .expect("WebSocket handshake failed");
    ws
}

async fn send(ws: &mut Ws, request: &ClientMessage) {
    ws.send(WsMessage::text(serde_json::to_string(request).unwrap()))
        .await
        .expect("Failed to send message");
}

async fn next_json(ws: &mut Ws) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("read error");
        match frame {
            WsMessage::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

/// Reads until the server's close frame; `false` if the socket stayed open.
async fn expect_close(ws: &mut Ws) -> bool {
    while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_secs(2), ws.next()).await {
        match frame {
            Ok(WsMessage::Close(_)) => return true,
            Ok(_) => continue,
            Err(_) => return false,
        }
    }
    false
}

async fn wait_for_clients(service: &WebsocketService, expected: usize) {
    for _ in 0..100 {
        if service.channels().stats().clients == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "expected {expected} clients, registry has {}",
        service.channels().stats().clients
    );
}

#[tokio::test]
async fn test_subscribe_and_receive_update() {
    let (url, service) = start_default_server().await;
    let mut ws = connect_as(&url, "member-1").await;

    send(&mut ws, &ClientMessage::subscribe("items", "42")).await;
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["status"], "success");
    assert_eq!(ack["request"]["channel"], "42");

    service.publish("items", "42", json!({"kind": "update", "id": 42})).await;
    let update = next_json(&mut ws).await;
    assert_eq!(update["type"], "update");
    assert_eq!(update["topic"], "items");
    assert_eq!(update["channel"], "42");
    assert_eq!(update["body"], json!({"kind": "update", "id": 42}));
}

#[tokio::test]
async fn test_anonymous_connection_cannot_subscribe() {
    let (url, _service) = start_default_server().await;
    let (mut ws, _) = connect_async(url.as_str()).await.expect("handshake failed");

    send(&mut ws, &ClientMessage::subscribe("items", "1")).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["error"]["name"], "Unauthorized");
    assert_eq!(reply["request"]["action"], "subscribe");
}

#[tokio::test]
async fn test_invalid_token_is_anonymous() {
    let (url, _service) = start_default_server().await;
    let (mut ws, _) = connect_async(format!("{url}?token=garbage"))
        .await
        .expect("handshake failed");

    send(&mut ws, &ClientMessage::subscribe("items", "1")).await;
    assert_eq!(next_json(&mut ws).await["error"]["name"], "Unauthorized");
}

#[tokio::test]
async fn test_malformed_frame_then_valid_request() {
    let (url, _service) = start_default_server().await;
    let mut ws = connect_as(&url, "member-1").await;

    ws.send(WsMessage::text(r#"{"wrong":"format"}"#)).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["error"]["name"], "BadRequest");

    send(&mut ws, &ClientMessage::subscribe("items", "1")).await;
    assert_eq!(next_json(&mut ws).await["status"], "success");
}

#[tokio::test]
async fn test_cross_process_publish() {
    let backbone = MemoryBackbone::default();
    let auth: Arc<dyn Authenticator> = Arc::new(JwtAuthenticator::new(SECRET));
    let (url1, service1) = start_server(Settings::default(), backbone.clone(), auth.clone()).await;
    let (url2, _service2) = start_server(Settings::default(), backbone.clone(), auth).await;

    let mut on_first = connect_as(&url1, "a").await;
    let mut on_second = connect_as(&url2, "b").await;
    for ws in [&mut on_first, &mut on_second] {
        send(ws, &ClientMessage::subscribe("items", "7")).await;
        assert_eq!(next_json(ws).await["status"], "success");
    }

    service1.publish("items", "7", json!("moved")).await;

    for ws in [&mut on_second, &mut on_first] {
        let update = next_json(ws).await;
        assert_eq!(update["topic"], "items");
        assert_eq!(update["channel"], "7");
        assert_eq!(update["body"], "moved");
    }
}

#[tokio::test]
async fn test_close_removes_client() {
    let (url, service) = start_default_server().await;
    let mut ws = connect_as(&url, "member-1").await;
    send(&mut ws, &ClientMessage::subscribe("items", "1")).await;
    next_json(&mut ws).await;
    wait_for_clients(&service, 1).await;

    ws.close(None).await.unwrap();
    wait_for_clients(&service, 0).await;
    assert!(!service.channels().channel_exists("items/1"));
}

#[tokio::test]
async fn test_heartbeat_evicts_silent_client() {
    let (url, service) = start_default_server().await;
    let mut ws = connect_as(&url, "member-1").await;
    send(&mut ws, &ClientMessage::subscribe("items", "1")).await;
    next_json(&mut ws).await;

    // the client never reads between ticks, so no pong is sent
    service.channels().heartbeat_tick();
    let report = service.channels().heartbeat_tick();
    assert_eq!(report.evicted.len(), 1);
    assert!(!service.channels().channel_exists("items/1"));

    assert!(expect_close(&mut ws).await, "server did not close the evicted connection");
    wait_for_clients(&service, 0).await;
}

#[tokio::test]
async fn test_wrong_path_is_refused() {
    let (url, _service) = start_default_server().await;
    let other = url.replace("/ws", "/other");
    assert!(connect_async(other.as_str()).await.is_err());
}

#[tokio::test]
async fn test_connection_limit() {
    let mut settings = Settings::default();
    settings.broker.max_connections = 1;
    let (url, service) = start_server(settings, MemoryBackbone::default(), Arc::new(Anonymous)).await;

    let (_first, _) = connect_async(url.as_str()).await.expect("handshake failed");
    wait_for_clients(&service, 1).await;
    assert!(connect_async(url.as_str()).await.is_err());
}

#[tokio::test]
async fn test_pending_validator_does_not_stall_heartbeat() {
    let (url, service) = start_default_server().await;
    let gate = Arc::new(Notify::new());
    let gate_in_validator = gate.clone();
    service
        .register("slow", move |_req: SubscriptionRequest| {
            let gate = gate_in_validator.clone();
            async move {
                gate.notified().await;
                Ok::<(), NotifError>(())
            }
        })
        .unwrap();

    let mut ws = connect_as(&url, "member-1").await;
    send(&mut ws, &ClientMessage::subscribe("slow", "1")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    service.channels().heartbeat_tick();
    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for the ping")
        .expect("connection closed")
        .expect("read error");
    assert!(matches!(frame, WsMessage::Ping(_)));
    // pushes out the queued pong
    ws.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let report = service.channels().heartbeat_tick();
    assert!(report.evicted.is_empty(), "responsive client was evicted");
    assert_eq!(service.channels().stats().clients, 1);

    gate.notify_one();
    assert_eq!(next_json(&mut ws).await["status"], "success");
}

#[tokio::test]
async fn test_disconnect_closes_socket_and_frees_slot() {
    let mut settings = Settings::default();
    settings.broker.max_connections = 1;
    let (url, service) = start_server(
        settings,
        MemoryBackbone::default(),
        Arc::new(JwtAuthenticator::new(SECRET)),
    )
    .await;

    let mut first = connect_as(&url, "member-1").await;
    send(&mut first, &ClientMessage::disconnect()).await;
    assert!(expect_close(&mut first).await, "disconnect left the socket open");
    wait_for_clients(&service, 0).await;

    let mut second = connect_as(&url, "member-2").await;
    send(&mut second, &ClientMessage::subscribe("items", "1")).await;
    assert_eq!(next_json(&mut second).await["status"], "success");
}

#[tokio::test]
async fn test_reply_echoes_unknown_fields() {
    let (url, _service) = start_default_server().await;
    let mut ws = connect_as(&url, "member-1").await;

    let request = json!({
        "realm": "notif",
        "action": "subscribe",
        "topic": "items",
        "channel": "1",
        "requestId": 99
    });
    ws.send(WsMessage::text(request.to_string())).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["status"], "success");
    assert_eq!(reply["request"], request);
}
