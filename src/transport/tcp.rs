//! Raw TCP transport: fixed-size binary frames, no header.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::{MessageReader, MessageWriter, WireMessage};
use crate::error::{RelayError, TransportError};

/// Reads exactly `frame_bytes` per message.
pub struct TcpFrameReader<R> {
    inner: R,
    frame_bytes: usize,
}

impl<R> TcpFrameReader<R> {
    /// Creates a reader producing `frame_bytes`-sized messages (minimum 1).
    pub fn new(inner: R, frame_bytes: usize) -> Self {
        Self {
            inner,
            frame_bytes: frame_bytes.max(1),
        }
    }
}

#[async_trait]
impl<R> MessageReader for TcpFrameReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn recv(&mut self) -> Option<Result<WireMessage, TransportError>> {
        let mut frame = vec![0u8; self.frame_bytes];
        let mut filled = 0;
        while filled < frame.len() {
            match self.inner.read(&mut frame[filled..]).await {
                Ok(0) if filled == 0 => return None,
                Ok(0) => {
                    return Some(Err(TransportError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("peer closed mid-frame ({filled}/{} bytes)", frame.len()),
                    ))))
                }
                Ok(n) => filled += n,
                Err(e) => return Some(Err(e.into())),
            }
        }
        Some(Ok(WireMessage::Binary(frame)))
    }
}

/// Writes binary messages as raw bytes.
pub struct TcpWriter<W> {
    inner: W,
}

impl<W> TcpWriter<W> {
    /// Wraps a byte stream.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<W> MessageWriter for TcpWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        match message {
            WireMessage::Binary(bytes) => {
                self.inner.write_all(&bytes).await?;
                Ok(())
            }
            WireMessage::Text(_) => Err(TransportError::UnsupportedMessage("text")),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Dials `addr`, mapping failures onto the connection error taxonomy.
pub async fn connect(addr: &str) -> Result<TcpStream, RelayError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| RelayError::from_connect(addr, e))?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Binds a listening socket.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, RelayError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| RelayError::Bind { addr, source })
}
