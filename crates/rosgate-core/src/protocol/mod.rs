//! rosbridge v2 wire vocabulary.
//!
//! Every frame is a JSON object with a mandatory `op` field. The constants
//! here name the recognized op codes and the fields they carry. Type names on
//! the wire never contain `/`; [`canonicalize_type_name`] performs the
//! substitution applied before every registry lookup and every emission.

// message fields
pub const OP_KEY: &str = "op";
pub const ID_KEY: &str = "id";
pub const TOPIC_NAME_KEY: &str = "topic";
pub const TYPE_NAME_KEY: &str = "type";
pub const REQUEST_TYPE_NAME_KEY: &str = "request_type";
pub const REPLY_TYPE_NAME_KEY: &str = "reply_type";
pub const MSG_KEY: &str = "msg";
pub const SERVICE_KEY: &str = "service";
pub const ARGS_KEY: &str = "args";
pub const VALUES_KEY: &str = "values";
pub const RESULT_KEY: &str = "result";

// op codes
pub const OP_ADVERTISE_TOPIC: &str = "advertise";
pub const OP_UNADVERTISE_TOPIC: &str = "unadvertise";
pub const OP_PUBLISH: &str = "publish";
pub const OP_SUBSCRIBE: &str = "subscribe";
pub const OP_UNSUBSCRIBE: &str = "unsubscribe";
pub const OP_CALL_SERVICE: &str = "call_service";
pub const OP_ADVERTISE_SERVICE: &str = "advertise_service";
pub const OP_UNADVERTISE_SERVICE: &str = "unadvertise_service";
pub const OP_SERVICE_RESPONSE: &str = "service_response";

/// Replace every `/` in a type name with `__`.
///
/// The wire format does not admit `/` in type names, so `foo/bar/Baz` travels
/// (and is stored) as `foo__bar__Baz`. The transform is idempotent; it is
/// applied to registry keys and to every `type`, `request_type` and
/// `reply_type` value before lookup, comparison or emission.
pub fn canonicalize_type_name(type_name: &str) -> String {
    type_name.replace('/', "__")
}
