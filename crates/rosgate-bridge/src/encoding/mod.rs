//! Encodings translate between raw WebSocket payloads and endpoint events.
//!
//! An [`Encoding`] owns the per-instance registry of known dynamic types and
//! the per-name bindings (topic -> type, service -> (request, reply) types)
//! needed to decode payloads whose schema is only known from prior
//! advertisements or subscriptions. Only the JSON rosbridge v2 encoding is
//! provided, but the endpoint depends on nothing beyond this trait.

mod json;

use std::sync::Arc;

use rosgate_core::dynamic::{DynType, DynValue};
use rosgate_core::Result;

use crate::endpoint::{ConnectionHandle, Endpoint};

pub use json::JsonEncoding;

/// Interprets raw inbound frames and produces raw outbound frames.
///
/// Encoders record the bindings they emit: publishing, advertising or
/// subscribing binds the topic to its type name; service-side encoders bind
/// the service to its request/reply type pair. Decode paths consult those
/// same bindings.
pub trait Encoding: Send + Sync {
    /// Interpret one inbound WebSocket message, dispatching the resulting
    /// event into `endpoint`. Never fails: malformed frames are logged and
    /// dropped.
    fn interpret_websocket_msg(
        &self,
        msg: &str,
        endpoint: &Endpoint,
        connection_handle: &ConnectionHandle,
    );

    /// Encode a publication on `topic_name`. Binds the topic to `topic_type`.
    fn encode_publication_msg(
        &self,
        topic_name: &str,
        topic_type: &str,
        id: &str,
        msg: &DynValue,
    ) -> Result<String>;

    /// Encode a service response. Binds the reply half of the service.
    fn encode_service_response_msg(
        &self,
        service_name: &str,
        service_type: &str,
        id: &str,
        response: &DynValue,
        result: bool,
    ) -> Result<String>;

    /// Encode a subscription request. Binds the topic to `message_type`.
    fn encode_subscribe_msg(&self, topic_name: &str, message_type: &str, id: &str)
        -> Result<String>;

    /// Encode a topic advertisement. Binds the topic to `message_type`.
    fn encode_advertise_msg(&self, topic_name: &str, message_type: &str, id: &str)
        -> Result<String>;

    /// Encode an outbound service call. Binds the request half of the service.
    fn encode_call_service_msg(
        &self,
        service_name: &str,
        service_type: &str,
        service_request: &DynValue,
        id: &str,
    ) -> Result<String>;

    /// Encode a service advertisement. Binds both halves of the service.
    fn encode_advertise_service_msg(
        &self,
        service_name: &str,
        request_type: &str,
        reply_type: &str,
    ) -> Result<String>;

    /// Add a type to the encoding's registry, keyed by the canonicalized
    /// `type_name` (or the type's own name when `type_name` is empty).
    /// Returns whether the insertion actually occurred.
    fn add_type(&self, r#type: Arc<DynType>, type_name: &str) -> bool;
}

pub type EncodingPtr = Arc<dyn Encoding>;

/// The default encoding: rosbridge v2 JSON.
pub fn make_json_encoding() -> EncodingPtr {
    Arc::new(JsonEncoding::new())
}
