//! rosgate bridge library entry.
//!
//! This crate assembles the WebSocket side of the bridge:
//! - Encoding: the rosbridge v2 JSON dispatcher and encoder/decoder, with the
//!   per-instance type registry and topic/service bindings.
//! - Policy: JWT verification policies (claim regex rules + HMAC keys) that
//!   gate inbound connections on the server role.
//! - Endpoint: the stateful core tracking per-connection advertisements,
//!   subscriptions, providers and in-flight calls across many connections
//!   sharing one local bus.
//! - Transport: tokio-tungstenite server/client loops over TCP or TLS,
//!   delivering the four events the endpoint consumes
//!   (open / message / close / validate).
//! - Config: the YAML schema for ports, TLS material and authentication.
//!
//! The bridge is designed for panic-free operation: no inbound frame, however
//! malformed, tears down a connection or the endpoint. Handlers log and drop.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod bus;
pub mod config;
pub mod encoding;
pub mod endpoint;
pub mod policy;
pub mod transport;

pub use endpoint::{Endpoint, WebSocketClient, WebSocketServer};
