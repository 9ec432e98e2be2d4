//! WebSocket transport over `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use super::{MessageReader, MessageWriter, WireMessage};
use crate::error::{RelayError, TransportError};

/// Receiving half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

/// Sending half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

/// Splits an open WebSocket into reader and writer halves.
pub fn split<S>(ws: WebSocketStream<S>) -> (WsReader<S>, WsWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = ws.split();
    (WsReader { stream }, WsWriter { sink })
}

fn map_error(err: tungstenite::Error) -> TransportError {
    use tungstenite::error::ProtocolError;
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            TransportError::Closed
        }
        tungstenite::Error::Io(e) => TransportError::Io(e),
        other => TransportError::Protocol(other.to_string()),
    }
}

#[async_trait]
impl<S> MessageReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Option<Result<WireMessage, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Binary(bytes)) => return Some(Ok(WireMessage::Binary(bytes))),
                Ok(Message::Text(text)) => return Some(Ok(WireMessage::Text(text))),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "WebSocket close frame received");
                    return None;
                }
                // Control frames are answered by tungstenite itself.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(e) => {
                    let err = map_error(e);
                    return if matches!(err, TransportError::Closed) {
                        None
                    } else {
                        Some(Err(err))
                    };
                }
            }
        }
    }
}

#[async_trait]
impl<S> MessageWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        let message = match message {
            WireMessage::Binary(bytes) => Message::Binary(bytes),
            WireMessage::Text(text) => Message::Text(text),
        };
        self.sink.send(message).await.map_err(map_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.sink.close().await.map_err(map_error) {
            Err(TransportError::Closed) => Ok(()),
            other => other,
        }
    }
}

/// A connected client: reader and writer over a possibly-TLS TCP stream.
pub type ClientConnection = (
    WsReader<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
    WsWriter<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
);

/// Opens a client connection to `uri` (e.g. `ws://127.0.0.1:9000/audio`).
pub async fn connect(uri: &str) -> Result<ClientConnection, RelayError> {
    match tokio_tungstenite::connect_async(uri).await {
        Ok((ws, _response)) => Ok(split(ws)),
        Err(tungstenite::Error::Io(e)) => Err(RelayError::from_connect(uri, e)),
        Err(e) => Err(RelayError::Handshake {
            endpoint: uri.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Completes the server side of the handshake on an accepted socket.
pub async fn accept(
    stream: TcpStream,
) -> Result<(WsReader<TcpStream>, WsWriter<TcpStream>), RelayError> {
    let peer = stream
        .peer_addr()
        .map_or_else(|_| "unknown peer".to_string(), |a| a.to_string());
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| RelayError::Handshake {
            endpoint: peer,
            reason: e.to_string(),
        })?;
    Ok(split(ws))
}
