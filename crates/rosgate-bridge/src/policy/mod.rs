//! Connection admission policy.
//!
//! A server endpoint may be configured with one or more verification
//! policies; inbound connections present a JSON Web Token as their single
//! WebSocket subprotocol, and the first policy whose claim rules and
//! signature check both pass admits the connection.

mod glob;
mod jwt;

pub use glob::glob_to_regex;
pub use jwt::{JwtValidator, ParsedToken, VerificationError, VerificationPolicy};
