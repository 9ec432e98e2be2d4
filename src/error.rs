//! Error types for audio-relay.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`RelayError`]): returned from `start()` and constructors,
//!   the component is cleaned up and does not retry.
//! - **Recoverable conditions**: drops, malformed messages and unsupported
//!   conversions are logged and surfaced via [`EventCallback`](crate::EventCallback).

use std::io;
use std::net::SocketAddr;

/// Fatal errors that prevent a source or sink from starting.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The remote endpoint refused the connection.
    #[error("connection refused by {endpoint}")]
    ConnectionRefused {
        /// Address or URI that was dialed.
        endpoint: String,
    },

    /// The connection was reset or aborted by the peer.
    #[error("connection to {endpoint} reset: {reason}")]
    ConnectionReset {
        /// Address or URI of the peer.
        endpoint: String,
        /// What the transport reported.
        reason: String,
    },

    /// A listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: SocketAddr,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The WebSocket opening handshake failed.
    #[error("websocket handshake with {endpoint} failed: {reason}")]
    Handshake {
        /// Address or URI of the peer.
        endpoint: String,
        /// Why the handshake failed.
        reason: String,
    },

    /// The requested audio device was not found.
    #[error("device not found: {name}")]
    DeviceNotFound {
        /// Name of the device that wasn't found.
        name: String,
    },

    /// No default device is configured for the requested direction.
    #[error("no default {direction} device configured")]
    NoDefaultDevice {
        /// `"input"` or `"output"`.
        direction: &'static str,
    },

    /// The format cannot be used (zero rate/channels, or a backend refusal).
    #[error("unsupported audio format: {reason}")]
    FormatUnsupported {
        /// Description of the problem.
        reason: String,
    },

    /// A source was started before being wired to a sink.
    #[error("{component} has no sink to deliver to")]
    NoSink {
        /// Name of the source.
        component: String,
    },

    /// An error from the audio backend.
    #[error("audio backend error: {0}")]
    BackendError(String),

    /// Any other I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl RelayError {
    /// Maps a connect-time I/O error onto the refused/reset taxonomy.
    pub fn from_connect(endpoint: impl Into<String>, err: io::Error) -> Self {
        let endpoint = endpoint.into();
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused { endpoint },
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Self::ConnectionReset {
                endpoint,
                reason: err.to_string(),
            },
            _ => Self::Io(err),
        }
    }

    /// Creates a format error with the given reason.
    pub fn format_unsupported(reason: impl Into<String>) -> Self {
        Self::FormatUnsupported {
            reason: reason.into(),
        }
    }

    /// Creates a backend error from any displayable error.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::BackendError(err.to_string())
    }
}

/// Errors from a message transport while a connection is running.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed (by either side).
    #[error("connection closed")]
    Closed,

    /// The peer reset the connection or an I/O call failed.
    #[error("transport i/o error: {0}")]
    Io(#[from] io::Error),

    /// Protocol-level failure reported by the transport library.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The transport cannot carry this kind of message (e.g. text over raw TCP).
    #[error("transport cannot carry {0} messages")]
    UnsupportedMessage(&'static str),
}

impl TransportError {
    /// Returns `true` if the error means the connection is gone.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::NotConnected
            ),
            Self::Protocol(_) | Self::UnsupportedMessage(_) => false,
        }
    }
}

/// Why an inbound network message could not be turned into audio or control data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedMessage {
    /// A text frame was not valid JSON.
    #[error("message is not valid JSON: {0}")]
    NotJson(String),

    /// The JSON object has no string `type` field.
    #[error("message has no \"type\" tag")]
    MissingType,

    /// An `"audio"` message whose payload is not a string.
    #[error("audio payload must be a base64 string")]
    AudioPayloadNotString,

    /// The audio payload is not valid base64.
    #[error("invalid base64 audio payload: {0}")]
    InvalidBase64(String),

    /// The byte length is not a whole number of frames.
    #[error("{len} bytes is not a whole number of {frame_bytes}-byte frames")]
    Misaligned {
        /// Length of the payload in bytes.
        len: usize,
        /// Bytes in one frame for the expected format.
        frame_bytes: usize,
    },

    /// A binary frame arrived on a typed (JSON-only) connection.
    #[error("unexpected binary frame on a typed connection")]
    UnexpectedBinary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_error_display() {
        let err = RelayError::DeviceNotFound {
            name: "USB Mic".to_string(),
        };
        assert_eq!(err.to_string(), "device not found: USB Mic");
    }

    #[test]
    fn test_from_connect_refused() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "nope");
        let err = RelayError::from_connect("127.0.0.1:9", io_err);
        assert!(matches!(err, RelayError::ConnectionRefused { .. }));
        assert_eq!(err.to_string(), "connection refused by 127.0.0.1:9");
    }

    #[test]
    fn test_from_connect_reset() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "peer went away");
        let err = RelayError::from_connect("ws://host", io_err);
        assert!(matches!(err, RelayError::ConnectionReset { .. }));
    }

    #[test]
    fn test_from_connect_other_is_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = RelayError::from_connect("x", io_err);
        assert!(matches!(err, RelayError::Io(_)));
    }

    #[test]
    fn test_transport_error_disconnect_classification() {
        assert!(TransportError::Closed.is_disconnect());
        assert!(TransportError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_disconnect());
        assert!(!TransportError::Protocol("bad frame".into()).is_disconnect());
        assert!(!TransportError::UnsupportedMessage("text").is_disconnect());
    }

    #[test]
    fn test_malformed_display() {
        let err = MalformedMessage::Misaligned {
            len: 3,
            frame_bytes: 2,
        };
        assert_eq!(
            err.to_string(),
            "3 bytes is not a whole number of 2-byte frames"
        );
    }
}
