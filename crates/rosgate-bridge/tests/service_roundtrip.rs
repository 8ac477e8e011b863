//! Service call flows in both directions.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use rosgate_bridge::bus::{CallHandle, ServiceClient};
use rosgate_bridge::encoding::make_json_encoding;
use rosgate_bridge::endpoint::{ConnectionHandle, Endpoint, WireOut};
use rosgate_core::dynamic::{DynType, DynValue, FieldType};

fn req_type() -> Arc<DynType> {
    DynType::new(
        "Data_Request",
        vec![("request".to_string(), FieldType::String)],
    )
}

fn rep_type() -> Arc<DynType> {
    DynType::new(
        "Data_Response",
        vec![("response".to_string(), FieldType::String)],
    )
}

fn make_endpoint() -> Arc<Endpoint> {
    let endpoint = Endpoint::new(make_json_encoding());
    endpoint.encoding().add_type(req_type(), "");
    endpoint.encoding().add_type(rep_type(), "");
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

/// Bus-side client that records the responses it receives.
#[derive(Default)]
struct RecordingClient {
    responses: Mutex<Vec<(String, DynValue)>>,
}

impl ServiceClient for RecordingClient {
    fn receive_response(&self, call_handle: CallHandle, response: DynValue) {
        let tag = call_handle
            .downcast::<String>()
            .map(|s| (*s).clone())
            .unwrap_or_default();
        self.responses.lock().push((tag, response));
    }
}

#[test]
fn outbound_service_call_round_trips() {
    let endpoint = make_endpoint();
    let (conn, mut rx) = connect(&endpoint, 1);

    // The remote peer advertises the service; it becomes the known provider.
    endpoint.handle_message(
        &conn,
        r#"{"op":"advertise_service","request_type":"Data_Request","reply_type":"Data_Response","service":"client_request"}"#,
    );

    let proxy = endpoint.create_service_proxy("client_request", &req_type(), Some(&rep_type()), &serde_yaml::Value::Null);

    let client = Arc::new(RecordingClient::default());
    let mut request = DynValue::new_empty(req_type());
    request.set("request", json!("Client Request")).unwrap();
    proxy.call_service(&request, client.clone(), Arc::new("call-A".to_string()));

    // The wire carries the first monotonically allocated call id.
    let frame = next_frame(&mut rx);
    assert_eq!(
        frame,
        json!({
            "op": "call_service",
            "service": "client_request",
            "args": {"request": "Client Request"},
            "id": "1"
        })
    );

    // The remote answers; the stored client resolves with the reply.
    endpoint.handle_message(
        &conn,
        r#"{"op":"service_response","service":"client_request","id":"1","values":{"response":"Server Response"},"result":true}"#,
    );

    let responses = client.responses.lock();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].0, "call-A");
    assert_eq!(responses[0].1.get("response"), Some(&json!("Server Response")));
}

#[test]
fn inbound_service_request_is_answered_on_the_same_connection() {
    let endpoint = make_endpoint();
    let (conn, mut rx) = connect(&endpoint, 1);

    // Local service implementation: answers every request immediately.
    assert!(endpoint.create_client_proxy(
        "client_request",
        &req_type(),
        Some(&rep_type()),
        Arc::new(|request: DynValue, client: Arc<dyn ServiceClient>, handle: CallHandle| {
            assert_eq!(request.get("request"), Some(&json!("Client Request")));
            let mut response = DynValue::new_empty(rep_type());
            response.set("response", json!("Server Response")).unwrap();
            client.receive_response(handle, response);
        }),
        &serde_yaml::Value::Null,
    ));

    endpoint.handle_message(
        &conn,
        r#"{"op":"call_service","service":"client_request","args":{"request":"Client Request"},"id":"42"}"#,
    );

    let frame = next_frame(&mut rx);
    assert_eq!(
        frame,
        json!({
            "op": "service_response",
            "service": "client_request",
            "values": {"response": "Server Response"},
            "result": true,
            "id": "42"
        })
    );
}

#[test]
fn a_later_service_advertisement_replaces_the_provider() {
    let endpoint = make_endpoint();
    let (first, mut first_rx) = connect(&endpoint, 1);
    let (second, mut second_rx) = connect(&endpoint, 2);

    let advertise = r#"{"op":"advertise_service","request_type":"Data_Request","reply_type":"Data_Response","service":"client_request"}"#;
    endpoint.handle_message(&first, advertise);
    endpoint.handle_message(&second, advertise);

    let client = Arc::new(RecordingClient::default());
    let request = DynValue::new_empty(req_type());
    endpoint.call_service("client_request", &request, client, Arc::new("x".to_string()));

    assert!(
        first_rx.try_recv().is_err(),
        "the replaced provider must not receive calls"
    );
    assert_eq!(next_frame(&mut second_rx)["op"], json!("call_service"));
}

#[test]
fn closing_the_provider_connection_cancels_in_flight_calls() {
    let endpoint = make_endpoint();
    let (conn, mut rx) = connect(&endpoint, 1);

    endpoint.handle_message(
        &conn,
        r#"{"op":"advertise_service","request_type":"Data_Request","reply_type":"Data_Response","service":"client_request"}"#,
    );

    let client = Arc::new(RecordingClient::default());
    let request = DynValue::new_empty(req_type());
    endpoint.call_service(
        "client_request",
        &request,
        client.clone(),
        Arc::new("x".to_string()),
    );
    let id = next_frame(&mut rx)["id"].as_str().unwrap().to_string();

    endpoint.handle_connection_closed(&conn);

    // A late response for the cancelled call resolves nothing.
    let (other, _other_rx) = connect(&endpoint, 2);
    endpoint.handle_message(
        &other,
        &format!(
            r#"{{"op":"service_response","service":"client_request","id":"{id}","values":{{"response":"late"}},"result":true}}"#
        ),
    );
    assert!(client.responses.lock().is_empty());
}

#[test]
fn calls_without_a_known_provider_are_dropped() {
    let endpoint = make_endpoint();
    let client = Arc::new(RecordingClient::default());
    let request = DynValue::new_empty(req_type());

    // No provider advertised: logged and dropped, nothing panics, nothing
    // resolves.
    endpoint.call_service("missing", &request, client.clone(), Arc::new("x".to_string()));
    assert!(client.responses.lock().is_empty());
}
