//! Network sending sink: TCP client, WebSocket client, or an attached writer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::StreamConfig;
use crate::error::{RelayError, TransportError};
use crate::event::{emit, EventCallback, StreamEvent};
use crate::format::AudioFormat;
use crate::pipeline::{BackpressurePolicy, BoundedChunkBuffer, PushOutcome};
use crate::sink::Sink;
use crate::transport::{
    shared_writer, tcp, websocket, Framing, MessageReader, SharedWriter, TypedMessage,
};
use crate::AudioChunk;

enum Target {
    Tcp(String),
    WebSocket(String),
    Attached(SharedWriter),
}

/// Sends chunks to a network peer.
///
/// A single sender task drains the buffer. Every write on the connection,
/// audio or [`send_message`](Self::send_message), goes through one
/// `tokio::sync::Mutex` around the writer, so writes never interleave.
///
/// A failed write closes the sink and emits [`StreamEvent::Disconnected`].
/// Connections the sink opened are closed by [`close`](Sink::close);
/// attached writers are left open for their owner.
///
/// # Example
///
/// ```no_run
/// use audio_relay::{AudioChunk, NetworkSink, Sink, StreamConfig};
/// use audio_relay::format::{AudioFormat, SampleEncoding};
/// use audio_relay::transport::Framing;
///
/// # async fn run() -> Result<(), audio_relay::RelayError> {
/// let format = AudioFormat::new(16000, 1, SampleEncoding::I16)?;
/// let sink = NetworkSink::websocket("ws://127.0.0.1:9000/audio", Framing::Typed, format, StreamConfig::default());
/// sink.start().await?;
/// sink.push_chunk(AudioChunk::new(vec![0i16; 320], 16000, 1)).await;
/// sink.close().await;
/// # Ok(())
/// # }
/// ```
pub struct NetworkSink {
    name: String,
    format: AudioFormat,
    framing: Framing,
    target: Target,
    config: StreamConfig,
    policy: BackpressurePolicy,
    buffer: Arc<BoundedChunkBuffer>,
    writer: Mutex<Option<SharedWriter>>,
    sender: Mutex<Option<JoinHandle<()>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    events: Option<EventCallback>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl NetworkSink {
    fn with_target(
        name: &str,
        target: Target,
        framing: Framing,
        format: AudioFormat,
        config: StreamConfig,
    ) -> Self {
        Self {
            name: name.to_string(),
            format,
            framing,
            target,
            policy: BackpressurePolicy::DropAfter(config.push_timeout),
            buffer: Arc::new(BoundedChunkBuffer::new(name, config.buffer_capacity)),
            config,
            writer: Mutex::new(None),
            sender: Mutex::new(None),
            watcher: Mutex::new(None),
            events: None,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Sends raw chunks to a TCP server at `addr` (e.g. `"127.0.0.1:9000"`).
    pub fn tcp(addr: impl Into<String>, format: AudioFormat, config: StreamConfig) -> Self {
        Self::with_target(
            "tcp-sink",
            Target::Tcp(addr.into()),
            Framing::Raw,
            format,
            config,
        )
    }

    /// Sends chunks to a WebSocket server at `uri`.
    pub fn websocket(
        uri: impl Into<String>,
        framing: Framing,
        format: AudioFormat,
        config: StreamConfig,
    ) -> Self {
        Self::with_target(
            "ws-sink",
            Target::WebSocket(uri.into()),
            framing,
            format,
            config,
        )
    }

    /// Writes to a connection the application owns. It is never closed here.
    pub fn attached(
        writer: SharedWriter,
        framing: Framing,
        format: AudioFormat,
        config: StreamConfig,
    ) -> Self {
        Self::with_target(
            "attached-sink",
            Target::Attached(writer),
            framing,
            format,
            config,
        )
    }

    /// Sets the name used in logs and events.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Overrides the default `DropAfter(push_timeout)` policy.
    #[must_use]
    pub fn with_policy(mut self, policy: BackpressurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the event callback.
    #[must_use]
    pub fn with_events(mut self, events: EventCallback) -> Self {
        self.buffer.set_events(events.clone());
        self.events = Some(events);
        self
    }

    /// The underlying buffer, for observing depth and drops.
    pub fn buffer(&self) -> &BoundedChunkBuffer {
        &self.buffer
    }

    /// Returns `true` while the sink is connected and accepting chunks.
    pub fn is_connected(&self) -> bool {
        self.writer.lock().is_some() && !self.buffer.is_closed()
    }

    /// Sends a typed control message on the same connection as the audio.
    ///
    /// # Errors
    ///
    /// [`TransportError::UnsupportedMessage`] under raw framing,
    /// [`TransportError::Closed`] before `start` or after `close`, or the
    /// write error itself.
    pub async fn send_message(
        &self,
        kind: impl Into<String>,
        payload: Value,
    ) -> Result<(), TransportError> {
        if self.framing == Framing::Raw {
            return Err(TransportError::UnsupportedMessage("typed"));
        }
        if self.buffer.is_closed() {
            return Err(TransportError::Closed);
        }
        let writer = self.writer.lock().clone().ok_or(TransportError::Closed)?;

        let message = TypedMessage {
            kind: kind.into(),
            payload,
        }
        .to_wire()?;
        let result = writer.lock().await.send(message).await;
        result
    }

    async fn connect(&self) -> Result<(SharedWriter, Option<JoinHandle<()>>), RelayError> {
        match &self.target {
            Target::Tcp(addr) => {
                let stream = tcp::connect(addr).await?;
                tracing::info!(sink = %self.name, %addr, "Connected");
                Ok((shared_writer(tcp::TcpWriter::new(stream)), None))
            }
            Target::WebSocket(uri) => {
                let (reader, writer) = websocket::connect(uri).await?;
                tracing::info!(sink = %self.name, %uri, "Connected");
                let watcher = tokio::spawn(watch_peer(
                    self.name.clone(),
                    Box::new(reader),
                    self.buffer.clone(),
                    self.events.clone(),
                ));
                Ok((shared_writer(writer), Some(watcher)))
            }
            Target::Attached(writer) => Ok((writer.clone(), None)),
        }
    }

    fn owns_connection(&self) -> bool {
        !matches!(self.target, Target::Attached(_))
    }
}

/// Drains the buffer into the writer until the buffer closes or a write fails.
async fn run_sender(
    name: String,
    buffer: Arc<BoundedChunkBuffer>,
    writer: SharedWriter,
    framing: Framing,
    events: Option<EventCallback>,
) {
    let mut sent: u64 = 0;
    while buffer.readable().await {
        let Some(chunk) = buffer.pop() else {
            continue;
        };
        let message = match framing.encode_audio(chunk.to_le_bytes()) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(sink = %name, error = %e, "Failed to encode chunk, skipping");
                continue;
            }
        };

        let result = writer.lock().await.send(message).await;
        if let Err(e) = result {
            // The peer watcher may have seen the same disconnect first.
            if !buffer.close() {
                return;
            }
            tracing::warn!(sink = %name, error = %e, sent, "Write failed, closing sink");
            emit(
                events.as_ref(),
                StreamEvent::Disconnected {
                    component: name.clone(),
                    reason: e.to_string(),
                },
            );
            return;
        }
        sent += 1;
        tracing::trace!(sink = %name, sent, "Chunk sent");
    }
    tracing::debug!(sink = %name, sent, "Sender loop finished");
}

/// Reads from a client connection we only write to, so a peer close is noticed.
async fn watch_peer(
    name: String,
    mut reader: Box<dyn MessageReader>,
    buffer: Arc<BoundedChunkBuffer>,
    events: Option<EventCallback>,
) {
    let reason = loop {
        match reader.recv().await {
            Some(Ok(message)) => {
                tracing::debug!(sink = %name, ?message, "Ignoring inbound message");
            }
            Some(Err(e)) => break e.to_string(),
            None => break "peer closed the connection".to_string(),
        }
    };
    if buffer.close() {
        tracing::warn!(sink = %name, %reason, "Peer disconnected");
        emit(
            events.as_ref(),
            StreamEvent::Disconnected {
                component: name,
                reason,
            },
        );
    }
}

#[async_trait]
impl Sink for NetworkSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    async fn start(&self) -> Result<(), RelayError> {
        if self.closed.load(Ordering::Acquire) || self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let (writer, watcher) = match self.connect().await {
            Ok(connected) => connected,
            Err(e) => {
                self.started.store(false, Ordering::Release);
                return Err(e);
            }
        };
        *self.writer.lock() = Some(writer.clone());

        let sender = tokio::spawn(run_sender(
            self.name.clone(),
            self.buffer.clone(),
            writer,
            self.framing,
            self.events.clone(),
        ));

        *self.sender.lock() = Some(sender);
        *self.watcher.lock() = watcher;
        Ok(())
    }

    async fn push_chunk(&self, chunk: AudioChunk) -> PushOutcome {
        self.buffer.push(chunk, self.policy).await
    }

    fn clear(&self) -> usize {
        self.buffer.clear()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.buffer.close();

        // The sender exits once the buffer is closed, after any write in flight.
        let sender = self.sender.lock().take();
        if let Some(mut sender) = sender {
            if tokio::time::timeout(self.config.shutdown_grace, &mut sender)
                .await
                .is_err()
            {
                sender.abort();
            }
        }
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }

        let writer = self.writer.lock().take();
        if let (Some(writer), true) = (writer, self.owns_connection()) {
            if let Err(e) = writer.lock().await.close().await {
                tracing::debug!(sink = %self.name, error = %e, "Error closing connection");
            }
        }
        tracing::info!(
            sink = %self.name,
            dropped = self.buffer.dropped(),
            "Network sink closed"
        );
    }

    fn depth(&self) -> usize {
        self.buffer.depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleEncoding;
    use crate::transport::{MessageWriter, WireMessage};

    #[derive(Default)]
    struct Recorded {
        sent: Vec<WireMessage>,
        closed: bool,
    }

    struct RecordingWriter(Arc<Mutex<Recorded>>);

    #[async_trait]
    impl MessageWriter for RecordingWriter {
        async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
            self.0.lock().sent.push(message);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.0.lock().closed = true;
            Ok(())
        }
    }

    struct FailingWriter;

    #[async_trait]
    impl MessageWriter for FailingWriter {
        async fn send(&mut self, _message: WireMessage) -> Result<(), TransportError> {
            Err(TransportError::Closed)
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn mono_i16() -> AudioFormat {
        AudioFormat::new(16000, 1, SampleEncoding::I16).unwrap()
    }

    #[tokio::test]
    async fn test_attached_sends_in_order_and_is_not_closed() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let sink = NetworkSink::attached(
            shared_writer(RecordingWriter(recorded.clone())),
            Framing::Raw,
            mono_i16(),
            StreamConfig::default(),
        );
        sink.start().await.unwrap();
        sink.start().await.unwrap();

        for i in 1..=3i16 {
            let outcome = sink.push_chunk(AudioChunk::new(vec![i], 16000, 1)).await;
            assert_eq!(outcome, PushOutcome::Queued);
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        sink.close().await;
        sink.close().await;

        let recorded = recorded.lock();
        assert_eq!(
            recorded.sent,
            vec![
                WireMessage::Binary(vec![1, 0]),
                WireMessage::Binary(vec![2, 0]),
                WireMessage::Binary(vec![3, 0]),
            ]
        );
        assert!(!recorded.closed);
    }

    #[tokio::test]
    async fn test_send_message_typed_only() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let writer = shared_writer(RecordingWriter(recorded.clone()));

        let raw = NetworkSink::attached(writer.clone(), Framing::Raw, mono_i16(), StreamConfig::default());
        raw.start().await.unwrap();
        assert!(matches!(
            raw.send_message("end", Value::Null).await,
            Err(TransportError::UnsupportedMessage(_))
        ));

        let typed = NetworkSink::attached(writer, Framing::Typed, mono_i16(), StreamConfig::default());
        assert!(matches!(
            typed.send_message("end", Value::Null).await,
            Err(TransportError::Closed)
        ));
        typed.start().await.unwrap();
        typed
            .send_message("config", serde_json::json!({"rate": 16000}))
            .await
            .unwrap();

        let sent = recorded.lock().sent.clone();
        let WireMessage::Text(text) = &sent[0] else {
            panic!("typed control must be text");
        };
        let value: Value = serde_json::from_str(text).unwrap();
        assert_eq!(value, serde_json::json!({"type": "config", "payload": {"rate": 16000}}));
    }

    #[tokio::test]
    async fn test_write_failure_closes_sink() {
        let disconnects = Arc::new(Mutex::new(0));
        let d = disconnects.clone();
        let sink = NetworkSink::attached(
            shared_writer(FailingWriter),
            Framing::Raw,
            mono_i16(),
            StreamConfig::default(),
        )
        .with_events(crate::event::event_callback(move |e: StreamEvent| {
            if matches!(e, StreamEvent::Disconnected { .. }) {
                *d.lock() += 1;
            }
        }));
        sink.start().await.unwrap();
        sink.push_chunk(AudioChunk::new(vec![1i16], 16000, 1)).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(!sink.is_connected());
        assert_eq!(
            sink.push_chunk(AudioChunk::new(vec![2i16], 16000, 1)).await,
            PushOutcome::Closed
        );
        assert_eq!(*disconnects.lock(), 1);
        sink.close().await;
    }

    #[tokio::test]
    async fn test_tcp_connection_refused() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = NetworkSink::tcp(addr.to_string(), mono_i16(), StreamConfig::default());
        let err = sink.start().await.unwrap_err();
        assert!(matches!(err, RelayError::ConnectionRefused { .. }));
        sink.close().await;
    }
}
