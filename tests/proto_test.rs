//! Codec properties: round-trip identity, classification, field omission

use chatq::proto::transport;
use chatq::{Message, MessageType};
use serde_json::{json, Value};

#[test]
fn round_trip_is_identity_up_to_field_ordering() {
    let raw = r#"{"id":"m-1","type":"chat","time":1700000000000,"from":"u1","dest":"u2","data":{"text":"hi","image":"http://example.com/a.png"},"sign":"abc"}"#;
    let message = Message::parse(raw).expect("well-formed frame should parse");
    let encoded = message.encode().expect("encode is total on parsed frames");

    let original: Value = serde_json::from_str(raw).unwrap();
    let round_tripped: Value = serde_json::from_str(&encoded).unwrap();
    assert_eq!(original, round_tripped);
}

#[test]
fn unknown_envelope_fields_survive_round_trip() {
    let raw = r#"{"type":"chat","data":"hi","priority":7,"trace":{"hop":1}}"#;
    let message = Message::parse(raw).unwrap();
    assert_eq!(message.extra.get("priority"), Some(&json!(7)));

    let round_tripped: Value = serde_json::from_str(&message.encode().unwrap()).unwrap();
    assert_eq!(serde_json::from_str::<Value>(raw).unwrap(), round_tripped);
}

#[test]
fn transport_round_trip_is_identity() {
    let raw = r#"{"type":200,"data":"m-1"}"#;
    let message = Message::parse(raw).unwrap();
    assert_eq!(message.kind, MessageType::Transport(200));
    assert_eq!(message.data_str(), Some("m-1"));

    let round_tripped: Value = serde_json::from_str(&message.encode().unwrap()).unwrap();
    assert_eq!(serde_json::from_str::<Value>(raw).unwrap(), round_tripped);
}

#[test]
fn integer_types_in_the_closed_set_are_transport() {
    for code in transport::CODES {
        assert!(
            Message::transport(code).is_transport(),
            "{} should classify as transport",
            code
        );
    }
}

#[test]
fn unknown_integer_type_is_a_data_message() {
    let message = Message::parse(r#"{"type":999,"data":"x"}"#).unwrap();
    assert_eq!(message.kind, MessageType::Transport(999));
    assert!(!message.is_transport());
}

#[test]
fn string_type_is_a_data_message() {
    let message = Message::data("chat").with_data("hi");
    assert!(!message.is_transport());
    assert_eq!(message.kind, MessageType::Data("chat".to_string()));
}

#[test]
fn constructors_omit_absent_fields() {
    assert_eq!(
        Message::transport(transport::READY).encode().unwrap(),
        r#"{"type":1000}"#
    );
    assert_eq!(
        Message::transport(transport::SERVER_GOT_IT)
            .with_data("m-1")
            .encode()
            .unwrap(),
        r#"{"type":100,"data":"m-1"}"#
    );
}

#[test]
fn builder_fills_the_envelope() {
    let message = Message::data("chat")
        .with_id("m-1")
        .with_time(1700000000000)
        .with_from("u1")
        .with_dest("u2")
        .with_data(json!({"text": "hi"}))
        .with_sign("s");
    let value: Value = serde_json::from_str(&message.encode().unwrap()).unwrap();
    assert_eq!(
        value,
        json!({
            "id": "m-1",
            "type": "chat",
            "time": 1700000000000i64,
            "from": "u1",
            "dest": "u2",
            "data": {"text": "hi"},
            "sign": "s",
        })
    );
}

#[test]
fn malformed_frames_fail_to_parse() {
    assert!(Message::parse("{not json").is_err());
    assert!(Message::parse(r#"["no","envelope"]"#).is_err());
    assert!(Message::parse(r#"{"data":"missing type"}"#).is_err());
}

#[test]
fn now_millis_is_epoch_milliseconds() {
    // 2023-01-01 in milliseconds; anything running this test is later.
    assert!(Message::now_millis() > 1_672_531_200_000);
}
