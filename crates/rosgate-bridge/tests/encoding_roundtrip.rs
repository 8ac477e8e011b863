//! Encode-then-decode laws for every op code.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use rosgate_bridge::encoding::make_json_encoding;
use rosgate_bridge::endpoint::{ConnectionHandle, Endpoint, WireOut};
use rosgate_core::dynamic::{DynType, DynValue, FieldType};

fn dispatch_type() -> Arc<DynType> {
    DynType::new(
        "Dispatch",
        vec![
            ("name".to_string(), FieldType::String),
            ("number".to_string(), FieldType::Uint32),
        ],
    )
}

fn make_endpoint() -> Arc<Endpoint> {
    let endpoint = Endpoint::new(make_json_encoding());
    endpoint.encoding().add_type(dispatch_type(), "");
    endpoint
}

fn connect(endpoint: &Arc<Endpoint>, id: u64) -> (ConnectionHandle, UnboundedReceiver<WireOut>) {
    let (handle, rx) = ConnectionHandle::new(id, None);
    endpoint.handle_connection_opened(&handle);
    (handle, rx)
}

fn next_frame(rx: &mut UnboundedReceiver<WireOut>) -> Value {
    match rx.try_recv() {
        Ok(WireOut::Frame(frame)) => serde_json::from_str(&frame).unwrap(),
        other => panic!("expected a frame, got {other:?}"),
    }
}

#[test]
fn publication_round_trips_through_interpret() {
    let endpoint = make_endpoint();
    let encoding = endpoint.encoding().clone();
    let (conn, _rx) = connect(&endpoint, 1);

    // A local subscription gives the decoder its topic binding.
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    endpoint.subscribe(
        "fruit",
        &dispatch_type(),
        Arc::new(move |value: DynValue| sink.lock().push(value)),
        &serde_yaml::Value::Null,
    );

    let mut msg = DynValue::new_empty(dispatch_type());
    msg.set("name", json!("apple")).unwrap();
    msg.set("number", json!(1)).unwrap();

    let frame = encoding
        .encode_publication_msg("fruit", "Dispatch", "", &msg)
        .unwrap();
    endpoint.handle_message(&conn, &frame);

    let got = received.lock();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].to_json(), msg.to_json());
}

#[test]
fn advertise_frame_round_trips() {
    let endpoint = make_endpoint();
    let encoding = endpoint.encoding().clone();
    let (conn, mut rx) = connect(&endpoint, 1);

    let frame = encoding
        .encode_advertise_msg("fruit", "Dispatch", "pub-1")
        .unwrap();
    let parsed: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(
        parsed,
        json!({"op": "advertise", "topic": "fruit", "type": "Dispatch", "id": "pub-1"})
    );

    // The advertising connection becomes a listener; a local publish reaches
    // it with the listener id echoed.
    endpoint.handle_message(&conn, &frame);

    let mut msg = DynValue::new_empty(dispatch_type());
    msg.set("name", json!("pear")).unwrap();
    endpoint.publish("fruit", &msg);

    let out = next_frame(&mut rx);
    assert_eq!(out["op"], json!("publish"));
    assert_eq!(out["topic"], json!("fruit"));
    assert_eq!(out["id"], json!("pub-1"));
    assert_eq!(out["msg"]["name"], json!("pear"));
}

#[test]
fn subscribe_frame_round_trips() {
    let endpoint = make_endpoint();
    let encoding = endpoint.encoding().clone();
    let (conn, mut rx) = connect(&endpoint, 1);

    let frame = encoding
        .encode_subscribe_msg("fruit", "Dispatch", "sub-7")
        .unwrap();
    let parsed: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(
        parsed,
        json!({"op": "subscribe", "topic": "fruit", "type": "Dispatch", "id": "sub-7"})
    );

    endpoint.handle_message(&conn, &frame);

    let mut msg = DynValue::new_empty(dispatch_type());
    msg.set("number", json!(3)).unwrap();
    endpoint.publish("fruit", &msg);

    let out = next_frame(&mut rx);
    assert_eq!(out["op"], json!("publish"));
    assert_eq!(out["id"], json!("sub-7"));
    assert_eq!(out["msg"]["number"], json!(3));
}

#[test]
fn unsubscribe_removes_the_listener() {
    let endpoint = make_endpoint();
    let (conn, mut rx) = connect(&endpoint, 1);

    endpoint.handle_message(&conn, r#"{"op":"subscribe","topic":"fruit","id":"a"}"#);
    endpoint.handle_message(&conn, r#"{"op":"unsubscribe","topic":"fruit","id":"a"}"#);

    let msg = DynValue::new_empty(dispatch_type());
    endpoint.publish("fruit", &msg);
    assert!(rx.try_recv().is_err(), "listener should have been removed");
}

#[test]
fn service_frames_round_trip() {
    let req_type = DynType::new(
        "Data_Request",
        vec![("request".to_string(), FieldType::String)],
    );
    let rep_type = DynType::new(
        "Data_Response",
        vec![("response".to_string(), FieldType::String)],
    );

    let endpoint = Endpoint::new(make_json_encoding());
    endpoint.encoding().add_type(req_type.clone(), "");
    endpoint.encoding().add_type(rep_type.clone(), "");
    let encoding = endpoint.encoding().clone();

    let frame = encoding
        .encode_advertise_service_msg("client_request", "Data_Request", "Data_Response")
        .unwrap();
    let parsed: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(
        parsed,
        json!({
            "op": "advertise_service",
            "service": "client_request",
            "request_type": "Data_Request",
            "reply_type": "Data_Response"
        })
    );

    let mut request = DynValue::new_empty(req_type);
    request.set("request", json!("Client Request")).unwrap();
    let frame = encoding
        .encode_call_service_msg("client_request", "Data_Request", &request, "1")
        .unwrap();
    let parsed: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(
        parsed,
        json!({
            "op": "call_service",
            "service": "client_request",
            "args": {"request": "Client Request"},
            "id": "1"
        })
    );

    let mut response = DynValue::new_empty(rep_type);
    response.set("response", json!("Server Response")).unwrap();
    let frame = encoding
        .encode_service_response_msg("client_request", "Data_Response", "1", &response, true)
        .unwrap();
    let parsed: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(
        parsed,
        json!({
            "op": "service_response",
            "service": "client_request",
            "values": {"response": "Server Response"},
            "result": true,
            "id": "1"
        })
    );
}

#[test]
fn type_names_are_canonicalized_on_the_wire() {
    let endpoint = Endpoint::new(make_json_encoding());
    let ty = DynType::new("foo/bar/Baz", vec![("v".to_string(), FieldType::Bool)]);
    assert!(endpoint.encoding().add_type(ty, ""));
    // Stored under the canonical name, so a second insert collides.
    assert!(!endpoint
        .encoding()
        .add_type(DynType::new("foo__bar__Baz", Vec::new()), ""));

    let frame = endpoint
        .encoding()
        .encode_advertise_msg("t", "foo/bar/Baz", "")
        .unwrap();
    let parsed: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(parsed["type"], json!("foo__bar__Baz"));
}

#[test]
fn unknown_op_and_missing_fields_have_no_side_effects() {
    let endpoint = make_endpoint();
    let (conn, mut rx) = connect(&endpoint, 1);

    endpoint.handle_message(&conn, r#"{"op":"mystery","topic":"fruit"}"#);
    endpoint.handle_message(&conn, r#"{"op":"advertise","topic":"fruit"}"#);
    endpoint.handle_message(&conn, r#"{"op":"publish","topic":"fruit"}"#);
    endpoint.handle_message(&conn, "not json at all");
    endpoint.handle_message(&conn, r#"{"no_op":true}"#);

    let msg = DynValue::new_empty(dispatch_type());
    endpoint.publish("fruit", &msg);
    assert!(
        rx.try_recv().is_err(),
        "no listener should have been recorded"
    );
}
