//! Error types for inbound request validation.

use thiserror::Error;

/// Validation failure for an inbound client frame.
///
/// The `Display` strings are part of the wire contract: they are sent back
/// to clients verbatim in `{"type":"error","error":...}` replies, so they
/// must not change between releases.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// The frame was not a JSON object with a string `type` field, or was
    /// not valid JSON at all.
    #[error("invalid 'type' string field")]
    InvalidType,

    /// A `cmd` message without a string `cmd` field.
    #[error("invalid 'cmd' string field")]
    InvalidCmd,

    /// A `timeout` field that is not a finite positive number.
    #[error("invalid 'timeout' float field")]
    InvalidTimeout,
}

/// Result type alias for request parsing.
pub type Result<T> = std::result::Result<T, RequestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_strings_are_stable() {
        assert_eq!(
            RequestError::InvalidType.to_string(),
            "invalid 'type' string field"
        );
        assert_eq!(
            RequestError::InvalidCmd.to_string(),
            "invalid 'cmd' string field"
        );
        assert_eq!(
            RequestError::InvalidTimeout.to_string(),
            "invalid 'timeout' float field"
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RequestError>();
    }
}
