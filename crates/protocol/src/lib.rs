//! # Shellgate Protocol Library
//!
//! Wire protocol definitions for the Shellgate session gateway.
//!
//! ## Overview
//!
//! Clients talk to the gateway over a WebSocket carrying JSON text frames.
//! This crate defines both directions of that exchange:
//!
//! - **Inbound**: [`parse_request`] turns a raw text frame into a
//!   [`ClientRequest`], enforcing the message shape before anything reaches
//!   a PTY session. Validation failures carry the exact client-facing error
//!   strings the gateway replies with.
//! - **Outbound**: [`ServerMessage`] is the `output`/`error` envelope sent
//!   back to clients.
//!
//! ## Wire format
//!
//! ```text
//! client -> gateway   {"type":"cmd","cmd":"echo hi","timeout":1.0}
//! gateway -> client   {"type":"output","output":"hi\r\n"}
//! gateway -> client   {"type":"error","error":"invalid 'cmd' string field"}
//! ```
//!
//! Message types other than `cmd` are reserved; a well-formed but
//! unrecognized `type` parses as [`ClientRequest::Unknown`] so the gateway
//! can ignore it without dropping the connection.

pub mod error;
pub mod messages;

pub use error::RequestError;
pub use messages::{
    parse_request, ClientRequest, ServerMessage, DEFAULT_COMMAND_TIMEOUT_SECS,
    MAX_COMMAND_TIMEOUT_SECS,
};
