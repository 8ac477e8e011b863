//! rosbridge v2 JSON encoding.
//!
//! Decode dispatches on the `op` field; most-frequent ops are checked first.
//! No inbound frame is ever allowed to tear down a connection: every parse,
//! schema or conversion failure is logged and the frame dropped.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Map, Value};

use rosgate_core::dynamic::{DynType, DynValue};
use rosgate_core::protocol::{
    canonicalize_type_name, ARGS_KEY, ID_KEY, MSG_KEY, OP_ADVERTISE_SERVICE, OP_ADVERTISE_TOPIC,
    OP_CALL_SERVICE, OP_KEY, OP_PUBLISH, OP_SERVICE_RESPONSE, OP_SUBSCRIBE,
    OP_UNADVERTISE_SERVICE, OP_UNADVERTISE_TOPIC, OP_UNSUBSCRIBE, REPLY_TYPE_NAME_KEY,
    REQUEST_TYPE_NAME_KEY, RESULT_KEY, SERVICE_KEY, TOPIC_NAME_KEY, TYPE_NAME_KEY, VALUES_KEY,
};
use rosgate_core::{BridgeError, Result};

use crate::encoding::Encoding;
use crate::endpoint::{ConnectionHandle, Endpoint};

/// Render a JSON value as the string the wire field carries.
///
/// String values are read directly; non-string scalars fall back to their
/// compact JSON rendering (`5` -> "5", `true` -> "true").
fn value_as_string(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

fn required_string(msg: &Value, key: &str, op: &str) -> Option<String> {
    match msg.get(key) {
        Some(value) => Some(value_as_string(value)),
        None => {
            tracing::error!(
                "Incoming WebSocket message [[ {msg} ]] with op code '{op}' is missing \
                 the required field '{key}'"
            );
            None
        }
    }
}

fn optional_string(msg: &Value, key: &str) -> String {
    msg.get(key).map(value_as_string).unwrap_or_default()
}

/// Construct a `DynValue` of `ty` from a required payload field.
fn required_msg(msg: &Value, key: &str, op: &str, ty: &Arc<DynType>) -> Option<DynValue> {
    let payload = msg.get(key).or_else(|| {
        tracing::error!(
            "Incoming WebSocket message [[ {msg} ]] with op code '{op}' is missing \
             the required field '{key}'"
        );
        None
    })?;

    match DynValue::from_json(ty.clone(), payload) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(
                "Failed to get the required message for type '{}': {e}",
                ty.name()
            );
            None
        }
    }
}

/// JSON implementation of [`Encoding`].
pub struct JsonEncoding {
    /// Known dynamic types, keyed by canonicalized name.
    types: DashMap<String, Arc<DynType>>,
    /// topic -> canonicalized type name, recorded by the encode side.
    types_by_topic: DashMap<String, String>,
    /// service -> (request type, reply type), either half possibly empty.
    types_by_service: DashMap<String, (String, String)>,
}

impl JsonEncoding {
    pub fn new() -> Self {
        Self {
            types: DashMap::new(),
            types_by_topic: DashMap::new(),
            types_by_service: DashMap::new(),
        }
    }

    fn get_type(&self, type_name: &str) -> Option<Arc<DynType>> {
        match self.types.get(&canonicalize_type_name(type_name)) {
            Some(ty) => Some(ty.clone()),
            None => {
                tracing::error!("Incoming message refers to an unregistered type: '{type_name}'");
                None
            }
        }
    }

    fn get_type_by_topic(&self, topic_name: &str) -> Option<Arc<DynType>> {
        let bound = match self.types_by_topic.get(topic_name) {
            Some(entry) => entry.clone(),
            None => {
                tracing::error!("There is no registered type for the topic '{topic_name}'");
                return None;
            }
        };
        self.get_type(&bound)
    }

    fn get_req_type_from_service(&self, service_name: &str) -> Option<Arc<DynType>> {
        let req = self
            .types_by_service
            .get(service_name)
            .map(|e| e.0.clone())
            .unwrap_or_default();
        if req.is_empty() {
            tracing::error!(
                "There is no registered service request type for the service '{service_name}'"
            );
            return None;
        }
        self.get_type(&req)
    }

    fn get_rep_type_from_service(&self, service_name: &str) -> Option<Arc<DynType>> {
        let rep = self
            .types_by_service
            .get(service_name)
            .map(|e| e.1.clone())
            .unwrap_or_default();
        if rep.is_empty() {
            tracing::error!(
                "There is no registered service reply type for the service '{service_name}'"
            );
            return None;
        }
        self.get_type(&rep)
    }

    fn bind_topic(&self, topic_name: &str, message_type: &str) {
        self.types_by_topic
            .insert(topic_name.to_string(), canonicalize_type_name(message_type));
    }

    fn bind_service_request(&self, service_name: &str, request_type: &str) {
        let mut entry = self
            .types_by_service
            .entry(service_name.to_string())
            .or_default();
        entry.0 = canonicalize_type_name(request_type);
    }

    fn bind_service_reply(&self, service_name: &str, reply_type: &str) {
        let mut entry = self
            .types_by_service
            .entry(service_name.to_string())
            .or_default();
        entry.1 = canonicalize_type_name(reply_type);
    }

    fn convert_payload(&self, payload: &DynValue, context: &str) -> Result<Value> {
        // DynValue -> JSON is total today, but keep the failure path typed so
        // an unrepresentable value surfaces as a conversion error.
        let value = payload.to_json();
        if value.is_object() {
            Ok(value)
        } else {
            Err(BridgeError::Conversion(format!(
                "{context}: payload of type '{}' did not render as a JSON object",
                payload.type_name()
            )))
        }
    }
}

impl Default for JsonEncoding {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoding for JsonEncoding {
    fn interpret_websocket_msg(
        &self,
        msg_str: &str,
        endpoint: &Endpoint,
        connection_handle: &ConnectionHandle,
    ) {
        let msg: Value = match serde_json::from_str(msg_str) {
            Ok(v) => v,
            Err(_) => {
                tracing::error!(
                    "Failed to parse raw received WebSocket message as a JSON: [[ {msg_str} ]]"
                );
                return;
            }
        };

        let op = match msg.get(OP_KEY).and_then(Value::as_str) {
            Some(op) => op.to_string(),
            None => {
                tracing::error!(
                    "Incoming message [[ {msg_str} ]] was missing the required 'op' code"
                );
                return;
            }
        };

        // Publish is the most likely op to be received, so check it first.
        if op == OP_PUBLISH {
            let Some(topic_name) = required_string(&msg, TOPIC_NAME_KEY, &op) else {
                return;
            };
            let Some(dest_type) = self.get_type_by_topic(&topic_name) else {
                return;
            };
            if let Some(data) = required_msg(&msg, MSG_KEY, &op, &dest_type) {
                endpoint.receive_publication(&topic_name, data, connection_handle);
            }
            return;
        }

        // Service traffic is the next most likely.
        if op == OP_CALL_SERVICE {
            let Some(service_name) = required_string(&msg, SERVICE_KEY, &op) else {
                return;
            };
            let Some(req_type) = self.get_req_type_from_service(&service_name) else {
                return;
            };
            if let Some(request) = required_msg(&msg, ARGS_KEY, &op, &req_type) {
                endpoint.receive_service_request(
                    &service_name,
                    request,
                    &optional_string(&msg, ID_KEY),
                    connection_handle,
                );
            }
            return;
        }

        if op == OP_SERVICE_RESPONSE {
            let Some(service_name) = required_string(&msg, SERVICE_KEY, &op) else {
                return;
            };
            let Some(rep_type) = self.get_rep_type_from_service(&service_name) else {
                return;
            };
            if let Some(response) = required_msg(&msg, VALUES_KEY, &op, &rep_type) {
                endpoint.receive_service_response(
                    &service_name,
                    response,
                    &optional_string(&msg, ID_KEY),
                    connection_handle,
                );
            }
            return;
        }

        if op == OP_ADVERTISE_TOPIC {
            let Some(type_name) = required_string(&msg, TYPE_NAME_KEY, &op) else {
                return;
            };
            let Some(topic_type) = self.get_type(&type_name) else {
                return;
            };
            let Some(topic_name) = required_string(&msg, TOPIC_NAME_KEY, &op) else {
                return;
            };
            endpoint.receive_topic_advertisement(
                &topic_name,
                &topic_type,
                &optional_string(&msg, ID_KEY),
                connection_handle,
            );
            return;
        }

        if op == OP_UNADVERTISE_TOPIC {
            let Some(topic_name) = required_string(&msg, TOPIC_NAME_KEY, &op) else {
                return;
            };
            endpoint.receive_topic_unadvertisement(
                &topic_name,
                &optional_string(&msg, ID_KEY),
                connection_handle,
            );
            return;
        }

        if op == OP_SUBSCRIBE {
            let Some(topic_name) = required_string(&msg, TOPIC_NAME_KEY, &op) else {
                return;
            };
            // `type` is optional on subscribe; when present it must resolve.
            let topic_type = match msg.get(TYPE_NAME_KEY) {
                Some(value) => match self.get_type(&value_as_string(value)) {
                    Some(ty) => Some(ty),
                    None => return,
                },
                None => None,
            };
            endpoint.receive_subscribe_request(
                &topic_name,
                topic_type.as_ref(),
                &optional_string(&msg, ID_KEY),
                connection_handle,
            );
            return;
        }

        if op == OP_UNSUBSCRIBE {
            let Some(topic_name) = required_string(&msg, TOPIC_NAME_KEY, &op) else {
                return;
            };
            endpoint.receive_unsubscribe_request(
                &topic_name,
                &optional_string(&msg, ID_KEY),
                connection_handle,
            );
            return;
        }

        if op == OP_ADVERTISE_SERVICE {
            let Some(request_type_name) = required_string(&msg, REQUEST_TYPE_NAME_KEY, &op) else {
                return;
            };
            let Some(reply_type_name) = required_string(&msg, REPLY_TYPE_NAME_KEY, &op) else {
                return;
            };
            let Some(req_type) = self.get_type(&request_type_name) else {
                return;
            };
            let Some(reply_type) = self.get_type(&reply_type_name) else {
                return;
            };
            let Some(service_name) = required_string(&msg, SERVICE_KEY, &op) else {
                return;
            };

            endpoint.receive_service_advertisement(
                &service_name,
                &req_type,
                &reply_type,
                connection_handle,
            );

            self.types_by_service.insert(
                service_name,
                (
                    canonicalize_type_name(&request_type_name),
                    canonicalize_type_name(&reply_type_name),
                ),
            );
            return;
        }

        if op == OP_UNADVERTISE_SERVICE {
            let Some(service_name) = required_string(&msg, SERVICE_KEY, &op) else {
                return;
            };
            // The field is named `type` here, not `request_type`.
            let service_type = match msg.get(TYPE_NAME_KEY) {
                Some(value) => match self.get_type(&value_as_string(value)) {
                    Some(ty) => Some(ty),
                    None => return,
                },
                None => None,
            };
            endpoint.receive_service_unadvertisement(
                &service_name,
                service_type.as_ref(),
                connection_handle,
            );
            return;
        }

        tracing::error!("Unrecognized operation: '{op}'");
    }

    fn encode_publication_msg(
        &self,
        topic_name: &str,
        topic_type: &str,
        id: &str,
        msg: &DynValue,
    ) -> Result<String> {
        let payload = self.convert_payload(msg, "encode publication")?;

        let mut output = Map::new();
        output.insert(OP_KEY.into(), json!(OP_PUBLISH));
        output.insert(TOPIC_NAME_KEY.into(), json!(topic_name));
        output.insert(MSG_KEY.into(), payload);
        if !id.is_empty() {
            output.insert(ID_KEY.into(), json!(id));
        }

        self.bind_topic(topic_name, topic_type);

        Ok(Value::Object(output).to_string())
    }

    fn encode_service_response_msg(
        &self,
        service_name: &str,
        service_type: &str,
        id: &str,
        response: &DynValue,
        result: bool,
    ) -> Result<String> {
        let payload = self.convert_payload(response, "encode service response")?;

        let mut output = Map::new();
        output.insert(OP_KEY.into(), json!(OP_SERVICE_RESPONSE));
        output.insert(SERVICE_KEY.into(), json!(service_name));
        output.insert(VALUES_KEY.into(), payload);
        output.insert(RESULT_KEY.into(), json!(result));
        if !id.is_empty() {
            output.insert(ID_KEY.into(), json!(id));
        }

        self.bind_service_reply(service_name, service_type);

        Ok(Value::Object(output).to_string())
    }

    fn encode_subscribe_msg(
        &self,
        topic_name: &str,
        message_type: &str,
        id: &str,
    ) -> Result<String> {
        let mut output = Map::new();
        output.insert(OP_KEY.into(), json!(OP_SUBSCRIBE));
        output.insert(TOPIC_NAME_KEY.into(), json!(topic_name));
        output.insert(
            TYPE_NAME_KEY.into(),
            json!(canonicalize_type_name(message_type)),
        );
        if !id.is_empty() {
            output.insert(ID_KEY.into(), json!(id));
        }

        self.bind_topic(topic_name, message_type);

        Ok(Value::Object(output).to_string())
    }

    fn encode_advertise_msg(
        &self,
        topic_name: &str,
        message_type: &str,
        id: &str,
    ) -> Result<String> {
        let mut output = Map::new();
        output.insert(OP_KEY.into(), json!(OP_ADVERTISE_TOPIC));
        output.insert(TOPIC_NAME_KEY.into(), json!(topic_name));
        output.insert(
            TYPE_NAME_KEY.into(),
            json!(canonicalize_type_name(message_type)),
        );
        if !id.is_empty() {
            output.insert(ID_KEY.into(), json!(id));
        }

        self.bind_topic(topic_name, message_type);

        Ok(Value::Object(output).to_string())
    }

    fn encode_call_service_msg(
        &self,
        service_name: &str,
        service_type: &str,
        service_request: &DynValue,
        id: &str,
    ) -> Result<String> {
        let payload = self.convert_payload(service_request, "encode service request")?;

        let mut output = Map::new();
        output.insert(OP_KEY.into(), json!(OP_CALL_SERVICE));
        output.insert(SERVICE_KEY.into(), json!(service_name));
        output.insert(ARGS_KEY.into(), payload);
        if !id.is_empty() {
            output.insert(ID_KEY.into(), json!(id));
        }

        self.bind_service_request(service_name, service_type);

        Ok(Value::Object(output).to_string())
    }

    fn encode_advertise_service_msg(
        &self,
        service_name: &str,
        request_type: &str,
        reply_type: &str,
    ) -> Result<String> {
        let mut output = Map::new();
        output.insert(OP_KEY.into(), json!(OP_ADVERTISE_SERVICE));
        output.insert(
            REQUEST_TYPE_NAME_KEY.into(),
            json!(canonicalize_type_name(request_type)),
        );
        output.insert(
            REPLY_TYPE_NAME_KEY.into(),
            json!(canonicalize_type_name(reply_type)),
        );
        output.insert(SERVICE_KEY.into(), json!(service_name));

        self.types_by_service.insert(
            service_name.to_string(),
            (
                canonicalize_type_name(request_type),
                canonicalize_type_name(reply_type),
            ),
        );

        Ok(Value::Object(output).to_string())
    }

    fn add_type(&self, r#type: Arc<DynType>, type_name: &str) -> bool {
        let name = canonicalize_type_name(if type_name.is_empty() {
            r#type.name()
        } else {
            type_name
        });

        match self.types.entry(name) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(r#type);
                true
            }
        }
    }
}
