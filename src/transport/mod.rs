//! Message transports: the wire-level side of network sources and sinks.
//!
//! A transport is split into a [`MessageReader`] and a [`MessageWriter`].
//! Sources and sinks only see these traits, so TCP, WebSocket and
//! application-owned connections are interchangeable.

pub mod framing;
pub mod tcp;
pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::TransportError;

pub use framing::{Framing, Inbound, TypedMessage, AUDIO_MESSAGE_TYPE};

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Raw bytes (one chunk in raw framing).
    Binary(Vec<u8>),
    /// UTF-8 text (JSON in typed framing).
    Text(String),
}

/// The receiving half of a connection.
#[async_trait]
pub trait MessageReader: Send {
    /// Waits for the next message. `None` means the peer closed cleanly.
    async fn recv(&mut self) -> Option<Result<WireMessage, TransportError>>;
}

/// The sending half of a connection.
#[async_trait]
pub trait MessageWriter: Send {
    /// Sends one message.
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError>;

    /// Closes the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A reader that may be shared with the application that owns the connection.
pub type SharedReader = Arc<Mutex<Box<dyn MessageReader>>>;

/// A writer that may be shared with the application that owns the connection.
pub type SharedWriter = Arc<Mutex<Box<dyn MessageWriter>>>;

/// Wraps a reader for sharing.
pub fn shared_reader(reader: impl MessageReader + 'static) -> SharedReader {
    Arc::new(Mutex::new(Box::new(reader)))
}

/// Wraps a writer for sharing.
pub fn shared_writer(writer: impl MessageWriter + 'static) -> SharedWriter {
    Arc::new(Mutex::new(Box::new(writer)))
}
