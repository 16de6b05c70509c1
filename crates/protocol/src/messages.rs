//! Protocol message definitions for Shellgate.
//!
//! Inbound frames are validated field by field rather than deserialized
//! straight into an enum: the gateway must distinguish "missing/mistyped
//! `type`" from "well-formed but unrecognized `type`" and reply with a
//! precise error string for each bad field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RequestError;

/// Per-command time budget when the client omits `timeout` and the gateway
/// configuration does not override it.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: f64 = 5.0;

/// Largest `timeout` a client may request, in seconds. Values above this
/// are rejected as [`RequestError::InvalidTimeout`] so a timeout can always
/// be converted to a `Duration` without overflow.
pub const MAX_COMMAND_TIMEOUT_SECS: f64 = 300.0;

/// A validated inbound client request.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    /// `{"type":"cmd","cmd":<string>,"timeout"?:<number>}` — run a command.
    Cmd {
        /// The command line to submit to the shell.
        cmd: String,
        /// Seconds to wait before draining output; `None` means the
        /// configured default applies.
        timeout: Option<f64>,
    },

    /// Any other well-formed `type`. Reserved for future message types;
    /// the gateway ignores these without replying or disconnecting.
    Unknown {
        /// The unrecognized message type.
        message_type: String,
    },
}

/// Parses and validates a raw text frame into a [`ClientRequest`].
///
/// Validation order matches the reply contract:
/// 1. The frame must be a JSON object with a string `type` field, else
///    [`RequestError::InvalidType`]. A frame that is not valid JSON has no
///    usable type and fails the same way.
/// 2. For `type == "cmd"`, `cmd` must be a string, else
///    [`RequestError::InvalidCmd`].
/// 3. `timeout` is optional ([`DEFAULT_COMMAND_TIMEOUT_SECS`] applies when
///    omitted); if present it must be a finite positive number no greater
///    than [`MAX_COMMAND_TIMEOUT_SECS`], else
///    [`RequestError::InvalidTimeout`].
pub fn parse_request(text: &str) -> Result<ClientRequest, RequestError> {
    let value: Value = serde_json::from_str(text).map_err(|_| RequestError::InvalidType)?;

    let message_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(RequestError::InvalidType)?;

    if message_type != "cmd" {
        return Ok(ClientRequest::Unknown {
            message_type: message_type.to_string(),
        });
    }

    let cmd = value
        .get("cmd")
        .and_then(Value::as_str)
        .ok_or(RequestError::InvalidCmd)?
        .to_string();

    let timeout = match value.get("timeout") {
        None | Some(Value::Null) => None,
        Some(raw) => {
            let secs = raw.as_f64().ok_or(RequestError::InvalidTimeout)?;
            if !secs.is_finite() || secs <= 0.0 || secs > MAX_COMMAND_TIMEOUT_SECS {
                return Err(RequestError::InvalidTimeout);
            }
            Some(secs)
        }
    };

    Ok(ClientRequest::Cmd { cmd, timeout })
}

/// Outbound message envelope sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Captured terminal output (also used for policy rejection text).
    Output {
        /// The drained, escape-stripped terminal text.
        output: String,
    },

    /// A client-facing failure: handshake rejection or message validation.
    Error {
        /// Human-readable error text.
        error: String,
    },
}

impl ServerMessage {
    /// Builds an `output` message.
    pub fn output(output: impl Into<String>) -> Self {
        Self::Output {
            output: output.into(),
        }
    }

    /// Builds an `error` message.
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    /// Serializes the message to its JSON wire form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
