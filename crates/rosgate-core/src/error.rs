//! Shared error type across rosgate crates.

use thiserror::Error;

/// Shared result type.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Unified error type used by the core and the bridge.
///
/// None of these ever tears down an endpoint: per-connection handlers log the
/// error at the appropriate level and drop the offending frame. `Config` is
/// the exception in that it prevents the endpoint from starting at all.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Unreadable certificate, missing required config key, invalid port.
    #[error("configuration error: {0}")]
    Config(String),
    /// Inbound payload is not valid JSON, or lacks an `op` field.
    #[error("parse error: {0}")]
    Parse(String),
    /// Missing required field for the op, unknown op, unknown type referenced.
    #[error("schema error: {0}")]
    Schema(String),
    /// JSON <-> dynamic value conversion failed.
    #[error("conversion error: {0}")]
    Conversion(String),
    /// A frame arrived for a name with no known type binding.
    #[error("binding error: {0}")]
    Binding(String),
    /// JWT verification failed, or the wrong number of subprotocols was offered.
    #[error("authentication error: {0}")]
    Auth(String),
    /// A connection failed to acknowledge close within the shutdown deadline.
    #[error("timed out waiting for connections to acknowledge shutdown")]
    ShutdownTimeout,
    /// Transport-level failure (bind, handshake, send).
    #[error("transport error: {0}")]
    Transport(String),
}
