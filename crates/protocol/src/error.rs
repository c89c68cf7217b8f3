//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering handshake and frame failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A required handshake parameter was not supplied.
    #[error("missing handshake parameter: {name}")]
    MissingParam {
        /// Name of the absent query parameter.
        name: &'static str,
    },

    /// A handshake parameter could not be parsed.
    #[error("invalid handshake parameter {name}: {value}")]
    InvalidParam {
        /// Name of the offending query parameter.
        name: &'static str,
        /// The raw value as received.
        value: String,
    },

    /// The connect URL itself was malformed.
    #[error("invalid connect url: {0}")]
    InvalidUrl(String),
}

impl From<url::ParseError> for ProtocolError {
    fn from(err: url::ParseError) -> Self {
        ProtocolError::InvalidUrl(err.to_string())
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
