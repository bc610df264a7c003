use serde_json::json;

use crate::transport::message::{
    ClientAction, ClientMessage, ServerMessage, parse, parse_request, serialize,
};
use crate::utils::error::NotifError;

fn encode(message: &ServerMessage) -> serde_json::Value {
    serde_json::from_str(&serialize(message).unwrap()).unwrap()
}

#[test]
fn test_parse_subscribe() {
    let msg = parse(br#"{"realm":"notif","action":"subscribe","topic":"items","channel":"1"}"#);
    assert_eq!(msg, Some(ClientMessage::subscribe("items", "1")));
}

#[test]
fn test_parse_subscribe_only_and_unsubscribe() {
    let only = parse(br#"{"realm":"notif","action":"subscribeOnly","topic":"items","channel":"2"}"#);
    assert_eq!(only, Some(ClientMessage::subscribe_only("items", "2")));

    let unsub = parse(br#"{"realm":"notif","action":"unsubscribe","topic":"items","channel":"2"}"#);
    assert_eq!(unsub, Some(ClientMessage::unsubscribe("items", "2")));
}

#[test]
fn test_parse_disconnect() {
    let msg = parse(br#"{"realm":"notif","action":"disconnect"}"#).unwrap();
    assert_eq!(msg.action, ClientAction::Disconnect);
}

#[test]
fn test_parse_rejects_malformed_frames() {
    let rejected: [&[u8]; 8] = [
        br#"{"wrong":"format"}"#,
        br#"{"action":"subscribe","topic":"items","channel":"1"}"#,
        br#"{"realm":"other","action":"subscribe","topic":"items","channel":"1"}"#,
        br#"{"realm":"notif","action":"publish","topic":"items","channel":"1"}"#,
        br#"{"realm":"notif","action":"subscribe","topic":"items"}"#,
        br#"{"realm":"notif","action":"subscribe","topic":1,"channel":"1"}"#,
        br#"{"realm":"notif"}"#,
        b"not json at all",
    ];
    for frame in rejected {
        assert!(parse(frame).is_none(), "accepted {}", String::from_utf8_lossy(frame));
    }
}

#[test]
fn test_success_response_shape() {
    let request = ClientMessage::subscribe("items", "1");
    assert_eq!(
        encode(&ServerMessage::success(serde_json::to_value(&request).unwrap())),
        json!({
            "realm": "notif",
            "type": "response",
            "status": "success",
            "request": {"realm": "notif", "action": "subscribe", "topic": "items", "channel": "1"}
        })
    );
}

#[test]
fn test_error_response_shape() {
    let request = ClientMessage::unsubscribe("items", "1");
    let error = NotifError::not_found("channel 'items/1' not found");
    assert_eq!(
        encode(&ServerMessage::error(&error, Some(serde_json::to_value(&request).unwrap()))),
        json!({
            "realm": "notif",
            "type": "response",
            "status": "error",
            "error": {"name": "NotFound", "message": "channel 'items/1' not found"},
            "request": {"realm": "notif", "action": "unsubscribe", "topic": "items", "channel": "1"}
        })
    );
}

#[test]
fn test_bad_request_has_no_request_echo() {
    let value = encode(&ServerMessage::error(&NotifError::BadRequest, None));
    assert_eq!(value["error"]["name"], "BadRequest");
    assert!(value.get("request").is_none());
}

#[test]
fn test_disconnect_echo_shape() {
    let raw = serde_json::to_value(ClientMessage::disconnect()).unwrap();
    let value = encode(&ServerMessage::success(raw));
    assert_eq!(value["request"], json!({"realm": "notif", "action": "disconnect"}));
}

#[test]
fn test_update_and_info_shapes() {
    assert_eq!(
        encode(&ServerMessage::update("items", "1", json!({"op": "create"}))),
        json!({"realm": "notif", "type": "update", "topic": "items", "channel": "1", "body": {"op": "create"}})
    );
    assert_eq!(
        encode(&ServerMessage::info("hello", None)),
        json!({"realm": "notif", "type": "info", "message": "hello"})
    );
    assert_eq!(
        encode(&ServerMessage::info("hello", Some(json!([1, 2])))),
        json!({"realm": "notif", "type": "info", "message": "hello", "extra": [1, 2]})
    );
}

#[test]
fn test_server_message_decodes_back() {
    let original = ServerMessage::error(
        &NotifError::custom("MemberCannotAccess", "nope"),
        Some(json!({"realm": "notif", "action": "subscribeOnly", "topic": "items", "channel": "9"})),
    );
    let decoded: ServerMessage = serde_json::from_str(&serialize(&original).unwrap()).unwrap();
    assert_eq!(decoded, original);
}

#[test]
fn test_parse_request_keeps_unknown_fields() {
    let request =
        parse_request(br#"{"realm":"notif","action":"subscribe","topic":"items","channel":"1","requestId":7}"#)
            .unwrap();
    assert_eq!(request.message, ClientMessage::subscribe("items", "1"));
    assert_eq!(request.raw["requestId"], 7);

    let value = encode(&ServerMessage::success(request.raw.clone()));
    assert_eq!(value["request"], request.raw);
}
