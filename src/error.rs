//! Error types for the ESL protocol engine

use thiserror::Error;

/// Result alias used throughout the crate.
pub type EslResult<T> = Result<T, EslError>;

/// Errors raised by the parser, connections, the handshake and the listener.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EslError {
    /// Socket I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The byte stream violated the ESL framing rules
    #[error("Protocol error: {message}")]
    ProtocolError {
        /// What was wrong with the stream.
        message: String,
    },

    /// A header line could not be parsed
    #[error("Invalid header: {header}")]
    InvalidHeader {
        /// The offending line or value.
        header: String,
    },

    /// A `text/event-json` body was not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The connection is no longer open
    #[error("Not connected")]
    NotConnected,

    /// The connection closed while a reply was awaited
    #[error("Connection closed")]
    ConnectionClosed,

    /// The outbound `connect` handshake did not produce channel data
    #[error("Handshake failed: {reason}")]
    HandshakeFailed {
        /// Why the handshake failed.
        reason: String,
    },

    /// The switch answered a command with `-ERR`
    #[error("Command failed: {reply_text}")]
    CommandFailed {
        /// Raw `Reply-Text` value.
        reply_text: String,
    },

    /// Reply-Text was neither `+OK` nor `-ERR`
    #[error("Unexpected reply: {reply_text}")]
    UnexpectedReply {
        /// Raw `Reply-Text` value.
        reply_text: String,
    },

    /// `start()` was called on a listener that is already running
    #[error("Listener already started")]
    AlreadyStarted,

    /// The listener has been disposed
    #[error("Listener disposed")]
    Disposed,
}

impl EslError {
    /// Build a [`EslError::ProtocolError`].
    pub fn protocol_error(message: impl Into<String>) -> Self {
        EslError::ProtocolError {
            message: message.into(),
        }
    }

    /// Build a [`EslError::HandshakeFailed`].
    pub fn handshake_failed(reason: impl Into<String>) -> Self {
        EslError::HandshakeFailed {
            reason: reason.into(),
        }
    }

    /// Whether this error came from malformed bytes on the wire.
    pub fn is_framing_error(&self) -> bool {
        matches!(
            self,
            EslError::ProtocolError { .. } | EslError::InvalidHeader { .. } | EslError::Json(_)
        )
    }
}

/// Terminal error delivered to every message and event subscriber when a
/// connection dies of a protocol violation.
///
/// Clean hang-ups (EOF, disconnect notice, local close) end subscriptions
/// without one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("framing error: {message}")]
pub struct FramingError {
    /// Description of the violation.
    pub message: String,
}

impl From<&EslError> for FramingError {
    fn from(e: &EslError) -> Self {
        FramingError {
            message: e.to_string(),
        }
    }
}
