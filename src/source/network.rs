//! Network receiving source: TCP or WebSocket listener, or an attached connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::watch;

use super::core::{
    Delivery, DisconnectHandler, DisconnectNotifier, SourceCore, SourceCounters, SourceStats,
};
use super::Source;
use crate::config::StreamConfig;
use crate::error::{MalformedMessage, RelayError, TransportError};
use crate::event::{emit, DropReason, EventCallback, StreamEvent};
use crate::format::{apply_gain, AudioFormat, Samples};
use crate::sink::Sink;
use crate::transport::{
    tcp, websocket, Framing, Inbound, MessageReader, MessageWriter, SharedReader, WireMessage,
};
use crate::AudioChunk;

/// Receives non-audio messages: `(type, payload)`.
///
/// Under raw framing, text frames arrive with type `"text"` and the text as
/// a string payload.
pub type ControlHandler = Arc<dyn Fn(&str, Value) + Send + Sync>;

enum Endpoint {
    TcpListener(SocketAddr),
    WebSocketListener(SocketAddr),
    Attached(SharedReader),
}

/// Where inbound messages come from once a peer is connected.
enum Inlet {
    Owned {
        reader: Box<dyn MessageReader>,
        // Kept only so the connection can be closed politely.
        writer: Option<Box<dyn MessageWriter>>,
    },
    Shared(SharedReader),
}

impl Inlet {
    async fn recv(&mut self) -> Option<Result<WireMessage, TransportError>> {
        match self {
            Self::Owned { reader, .. } => reader.recv().await,
            Self::Shared(reader) => reader.lock().await.recv().await,
        }
    }

    /// Closes owned connections. Attached ones belong to the application.
    async fn release(self) {
        if let Self::Owned {
            writer: Some(mut writer),
            ..
        } = self
        {
            let _ = writer.close().await;
        }
    }
}

/// Receives audio from one network peer.
///
/// - [`tcp_listener`](Self::tcp_listener): accepts one TCP peer and reads
///   fixed-size raw chunks of `chunk_frames` frames
/// - [`websocket_listener`](Self::websocket_listener): accepts one
///   WebSocket peer, raw or typed framing
/// - [`attached`](Self::attached): reads from a connection the application
///   owns and never closes it
///
/// Malformed messages are logged, counted and skipped. The source ends when
/// the peer disconnects, firing the disconnect handler once.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use audio_relay::{NetworkSource, QueueSink, Source, StreamConfig};
/// use audio_relay::format::{AudioFormat, SampleEncoding};
/// use audio_relay::transport::Framing;
///
/// # async fn run() -> Result<(), audio_relay::RelayError> {
/// let format = AudioFormat::new(16000, 1, SampleEncoding::I16)?;
/// let mut source = NetworkSource::websocket_listener(
///     "127.0.0.1:0".parse().unwrap(),
///     Framing::Typed,
///     format,
///     StreamConfig::default(),
/// )
/// .with_control_handler(Arc::new(|kind, payload| println!("{kind}: {payload}")));
///
/// source.wire_to(Arc::new(QueueSink::new("app", format, 32)));
/// source.start().await?;
/// println!("listening on {:?}", source.local_addr());
/// # Ok(())
/// # }
/// ```
pub struct NetworkSource {
    core: SourceCore,
    endpoint: Endpoint,
    framing: Framing,
    config: StreamConfig,
    gain: Option<f64>,
    control: Option<ControlHandler>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl NetworkSource {
    fn with_endpoint(
        name: &str,
        endpoint: Endpoint,
        framing: Framing,
        format: AudioFormat,
        config: StreamConfig,
    ) -> Self {
        Self {
            core: SourceCore::new(name, format),
            endpoint,
            framing,
            config,
            gain: None,
            control: None,
            local_addr: Mutex::new(None),
        }
    }

    /// Listens on `addr` for one TCP peer sending raw chunks.
    ///
    /// Each chunk is exactly `config.chunk_frames` frames of `format`.
    pub fn tcp_listener(addr: SocketAddr, format: AudioFormat, config: StreamConfig) -> Self {
        Self::with_endpoint(
            "tcp-source",
            Endpoint::TcpListener(addr),
            Framing::Raw,
            format,
            config,
        )
    }

    /// Listens on `addr` for one WebSocket peer.
    pub fn websocket_listener(
        addr: SocketAddr,
        framing: Framing,
        format: AudioFormat,
        config: StreamConfig,
    ) -> Self {
        Self::with_endpoint(
            "ws-source",
            Endpoint::WebSocketListener(addr),
            framing,
            format,
            config,
        )
    }

    /// Reads from a connection the application owns.
    pub fn attached(
        reader: SharedReader,
        framing: Framing,
        format: AudioFormat,
        config: StreamConfig,
    ) -> Self {
        Self::with_endpoint(
            "attached-source",
            Endpoint::Attached(reader),
            framing,
            format,
            config,
        )
    }

    /// Sets the name used in logs and events.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.core.set_name(name);
        self
    }

    /// Multiplies every received sample by `gain`, saturating.
    #[must_use]
    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = Some(gain);
        self
    }

    /// Routes non-audio messages to `handler`.
    #[must_use]
    pub fn with_control_handler(mut self, handler: ControlHandler) -> Self {
        self.control = Some(handler);
        self
    }

    /// Sets the event callback.
    #[must_use]
    pub fn with_events(mut self, events: EventCallback) -> Self {
        self.core.set_events(events);
        self
    }

    /// Returns `true` from start until stop or peer disconnect.
    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    /// The bound address of a listening source, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    async fn bind(&self, addr: SocketAddr) -> Result<TcpListener, RelayError> {
        let listener = tcp::bind(addr).await?;
        let bound = listener.local_addr()?;
        *self.local_addr.lock() = Some(bound);
        tracing::info!(source = %self.core.name(), addr = %bound, "Listening");
        Ok(listener)
    }
}

/// State moved into the receive task.
struct ReceiveLoop {
    name: String,
    format: AudioFormat,
    framing: Framing,
    gain: Option<f64>,
    control: Option<ControlHandler>,
    delivery: Delivery,
    counters: Arc<SourceCounters>,
    events: Option<EventCallback>,
    notifier: Arc<DisconnectNotifier>,
    ended: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
    // How long a delivery in flight at stop may still take.
    flush: Duration,
}

enum Exit {
    Stopped,
    Disconnected(String),
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

impl ReceiveLoop {
    async fn accept_tcp(&self, listener: TcpListener, chunk_bytes: usize) -> Option<Inlet> {
        let mut shutdown = self.shutdown.clone();
        let accepted = tokio::select! {
            _ = stopped(&mut shutdown) => return None,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                tracing::info!(source = %self.name, %peer, "Peer connected");
                let _ = stream.set_nodelay(true);
                Some(Inlet::Owned {
                    reader: Box::new(tcp::TcpFrameReader::new(stream, chunk_bytes)),
                    writer: None,
                })
            }
            Err(e) => {
                self.finish(Exit::Disconnected(format!("accept failed: {e}")));
                None
            }
        }
    }

    async fn accept_websocket(&self, listener: TcpListener) -> Option<Inlet> {
        let mut shutdown = self.shutdown.clone();
        loop {
            let accepted = tokio::select! {
                _ = stopped(&mut shutdown) => return None,
                accepted = listener.accept() => accepted,
            };
            let stream = match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    self.finish(Exit::Disconnected(format!("accept failed: {e}")));
                    return None;
                }
            };
            let handshake = tokio::select! {
                _ = stopped(&mut shutdown) => return None,
                handshake = websocket::accept(stream) => handshake,
            };
            match handshake {
                Ok((reader, writer)) => {
                    tracing::info!(source = %self.name, "WebSocket peer connected");
                    return Some(Inlet::Owned {
                        reader: Box::new(reader),
                        writer: Some(Box::new(writer)),
                    });
                }
                // A failed handshake doesn't count as the one peer.
                Err(e) => tracing::warn!(source = %self.name, error = %e, "Handshake failed"),
            }
        }
    }

    async fn run(self, mut inlet: Inlet) {
        let mut shutdown = self.shutdown.clone();
        let exit = loop {
            let next = tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => break Exit::Stopped,
                next = inlet.recv() => next,
            };

            let message = match next {
                None => break Exit::Disconnected("peer closed the connection".to_string()),
                Some(Err(e)) => break Exit::Disconnected(e.to_string()),
                Some(Ok(message)) => message,
            };

            if let Some(chunk) = self.decode(message) {
                let delivery = self.delivery.deliver(chunk);
                tokio::pin!(delivery);
                let finished = tokio::select! {
                    biased;
                    _ = &mut delivery => true,
                    _ = stopped(&mut shutdown) => false,
                };
                if !finished {
                    // Stopped mid-push: finish it, or count the chunk as lost.
                    if tokio::time::timeout(self.flush, &mut delivery).await.is_err() {
                        self.dropped_at_stop();
                    }
                    break Exit::Stopped;
                }
            }
        };

        inlet.release().await;
        self.finish(exit);
    }

    /// Turns a message into a chunk, or handles it as control or malformed.
    fn decode(&self, message: WireMessage) -> Option<AudioChunk> {
        match self.framing.decode(message) {
            Ok(Inbound::Audio(bytes)) => match AudioChunk::from_le_bytes(self.format, &bytes) {
                Ok(mut chunk) => {
                    if let Some(gain) = self.gain {
                        amplify(&mut chunk.samples, gain);
                    }
                    Some(chunk)
                }
                Err(e) => {
                    self.malformed(e);
                    None
                }
            },
            Ok(Inbound::Control { kind, payload }) => {
                match &self.control {
                    Some(handler) => handler(&kind, payload),
                    None => tracing::debug!(
                        source = %self.name,
                        %kind,
                        "No control handler, message skipped"
                    ),
                }
                None
            }
            Err(e) => {
                self.malformed(e);
                None
            }
        }
    }

    fn malformed(&self, error: MalformedMessage) {
        let total = self.counters.record_malformed();
        tracing::warn!(source = %self.name, %error, total, "Skipping malformed message");
        emit(
            self.events.as_ref(),
            StreamEvent::MalformedMessage {
                component: self.name.clone(),
                error,
            },
        );
    }

    fn dropped_at_stop(&self) {
        let total = self.counters.record_drop();
        tracing::warn!(
            source = %self.name,
            flush_ms = self.flush.as_millis() as u64,
            total,
            "Sink did not take the last chunk before stop, dropped"
        );
        emit(
            self.events.as_ref(),
            StreamEvent::ChunkDropped {
                component: self.name.clone(),
                reason: DropReason::BufferFull,
            },
        );
    }

    fn finish(&self, exit: Exit) {
        match exit {
            Exit::Stopped => {
                tracing::debug!(source = %self.name, "Receive loop stopped");
            }
            Exit::Disconnected(reason) => {
                self.ended.store(true, Ordering::Release);
                tracing::warn!(source = %self.name, %reason, "Peer disconnected");
                emit(
                    self.events.as_ref(),
                    StreamEvent::Disconnected {
                        component: self.name.clone(),
                        reason,
                    },
                );
                self.notifier.fire();
            }
        }
    }
}

fn amplify(samples: &mut Samples, gain: f64) {
    match samples {
        Samples::I8(v) => apply_gain(v, gain),
        Samples::I16(v) => apply_gain(v, gain),
        Samples::I32(v) => apply_gain(v, gain),
        Samples::F32(v) => apply_gain(v, gain),
        Samples::F64(v) => apply_gain(v, gain),
    }
}

#[async_trait]
impl Source for NetworkSource {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn native_format(&self) -> AudioFormat {
        self.core.native_format()
    }

    fn output_format(&self) -> AudioFormat {
        self.core.output_format()
    }

    fn wire_to(&mut self, sink: Arc<dyn Sink>) {
        self.core.wire_to(sink);
    }

    fn attach_conversion(&mut self, target: AudioFormat) {
        self.core.attach_conversion(target);
    }

    fn set_disconnect_handler(&mut self, handler: DisconnectHandler) {
        self.core.set_disconnect_handler(handler);
    }

    async fn start(&self) -> Result<(), RelayError> {
        let delivery = self.core.delivery()?;
        let _lifecycle = self.core.lifecycle().await;
        if !self.core.begin() {
            return Ok(());
        }

        let receiver = ReceiveLoop {
            name: self.core.name().to_string(),
            format: self.core.native_format(),
            framing: self.framing,
            gain: self.gain,
            control: self.control.clone(),
            delivery,
            counters: self.core.counters(),
            events: self.core.events().cloned(),
            notifier: self.core.notifier(),
            ended: self.core.ended_flag(),
            shutdown: self.core.shutdown_signal(),
            // Leaves the rest of the stop grace for the task to exit.
            flush: self.config.shutdown_grace / 2,
        };

        let task = match &self.endpoint {
            Endpoint::TcpListener(addr) => {
                let listener = match self.bind(*addr).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        self.core.abort_start();
                        return Err(e);
                    }
                };
                let chunk_bytes = self
                    .core
                    .native_format()
                    .chunk_bytes(self.config.chunk_frames);
                tokio::spawn(async move {
                    if let Some(inlet) = receiver.accept_tcp(listener, chunk_bytes).await {
                        receiver.run(inlet).await;
                    }
                })
            }
            Endpoint::WebSocketListener(addr) => {
                let listener = match self.bind(*addr).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        self.core.abort_start();
                        return Err(e);
                    }
                };
                tokio::spawn(async move {
                    if let Some(inlet) = receiver.accept_websocket(listener).await {
                        receiver.run(inlet).await;
                    }
                })
            }
            Endpoint::Attached(reader) => {
                let inlet = Inlet::Shared(reader.clone());
                tracing::info!(source = %self.core.name(), "Reading from attached connection");
                tokio::spawn(receiver.run(inlet))
            }
        };

        self.core.set_task(task);
        Ok(())
    }

    async fn stop(&self) {
        let _lifecycle = self.core.lifecycle().await;
        if !self.core.mark_stopped() {
            return;
        }
        self.core.join_task(self.config.shutdown_grace).await;
        self.core.notifier().fire();

        let stats = self.core.stats();
        tracing::info!(
            source = %self.core.name(),
            delivered = stats.delivered,
            dropped = stats.dropped,
            malformed = stats.malformed,
            "Network source stopped"
        );
    }

    fn stats(&self) -> SourceStats {
        self.core.stats()
    }
}
