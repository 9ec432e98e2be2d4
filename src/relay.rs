//! One source wired to one sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::RelayError;
use crate::sink::Sink;
use crate::source::{Source, SourceStats};

/// Statistics about a running relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Counters of the source side.
    pub source: SourceStats,
    /// Chunks waiting in the sink's buffer.
    pub sink_depth: usize,
}

/// Owns a source and the sink it delivers into.
///
/// The relay wires the source to the sink and attaches a converter to the
/// sink's format. It starts the sink before the source and stops them in
/// the reverse order.
///
/// # Lifecycle
///
/// 1. Created by [`Relay::new`]
/// 2. [`start()`](Relay::start) opens the sink, then the source
/// 3. Audio flows until [`stop()`](Relay::stop) or the source disconnects
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use audio_relay::{CaptureSource, NetworkSink, Relay, StreamConfig, DeviceSelection};
/// use audio_relay::backend::MockBackend;
/// use audio_relay::format::{AudioFormat, SampleEncoding};
/// use audio_relay::transport::Framing;
///
/// # async fn run() -> Result<(), audio_relay::RelayError> {
/// let mic = AudioFormat::new(48000, 2, SampleEncoding::F32)?;
/// let wire = AudioFormat::new(16000, 1, SampleEncoding::I16)?;
/// let config = StreamConfig::default();
///
/// let source = CaptureSource::new(
///     Arc::new(MockBackend::new()),
///     DeviceSelection::input(None),
///     mic,
///     config.clone(),
/// );
/// let sink = NetworkSink::websocket("ws://127.0.0.1:9000", Framing::Typed, wire, config);
///
/// let relay = Relay::new(source, Arc::new(sink));
/// relay.start().await?;
/// relay.disconnected().await;
/// relay.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct Relay {
    source: Box<dyn Source>,
    sink: Arc<dyn Sink>,
    disconnected: watch::Receiver<bool>,
    stopped: AtomicBool,
}

impl Relay {
    /// Wires `source` to `sink`, converting to the sink's format.
    pub fn new(source: impl Source + 'static, sink: Arc<dyn Sink>) -> Self {
        let mut source: Box<dyn Source> = Box::new(source);
        let (tx, rx) = watch::channel(false);

        source.set_disconnect_handler(Arc::new(move || {
            tx.send_replace(true);
        }));
        source.wire_to(sink.clone());
        source.attach_conversion(sink.format());

        Self {
            source,
            sink,
            disconnected: rx,
            stopped: AtomicBool::new(false),
        }
    }

    /// Starts the sink, then the source.
    ///
    /// If the source fails to start the sink is closed again.
    pub async fn start(&self) -> Result<(), RelayError> {
        self.sink.start().await?;
        if let Err(e) = self.source.start().await {
            tracing::warn!(
                source = %self.source.name(),
                sink = %self.sink.name(),
                error = %e,
                "Relay failed to start"
            );
            self.sink.close().await;
            return Err(e);
        }

        tracing::info!(
            source = %self.source.name(),
            sink = %self.sink.name(),
            from = %self.source.native_format(),
            to = %self.source.output_format(),
            "Relay started"
        );
        Ok(())
    }

    /// Stops the source, then closes the sink. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.source.stop().await;
        self.sink.close().await;

        let stats = self.stats();
        tracing::info!(
            source = %self.source.name(),
            delivered = stats.source.delivered,
            dropped = stats.source.dropped,
            "Relay stopped"
        );
    }

    /// Resolves once the source has disconnected or been stopped.
    pub async fn disconnected(&self) {
        let mut rx = self.disconnected.clone();
        // The sender lives in the source's handler, so this only errs if the
        // source itself is gone.
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Returns `true` once the source has disconnected or been stopped.
    pub fn is_disconnected(&self) -> bool {
        *self.disconnected.borrow()
    }

    /// Current statistics.
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            source: self.source.stats(),
            sink_depth: self.sink.depth(),
        }
    }

    /// The wired source.
    pub fn source(&self) -> &dyn Source {
        self.source.as_ref()
    }

    /// The wired sink.
    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::MockBackend;
    use crate::config::{DeviceSelection, StreamConfig};
    use crate::format::{AudioFormat, SampleEncoding, Samples};
    use crate::sink::QueueSink;
    use crate::source::{CaptureSource, Waveform};

    fn format(rate: u32, channels: u16, encoding: SampleEncoding) -> AudioFormat {
        AudioFormat::new(rate, channels, encoding).unwrap()
    }

    #[tokio::test]
    async fn test_relay_converts_to_sink_format() {
        let backend = MockBackend::new()
            .with_waveform(Waveform::Constant(0.5))
            .with_period(Duration::from_millis(1))
            .with_input_limit(3);
        let config = StreamConfig {
            chunk_frames: 480,
            ..StreamConfig::default()
        };

        let source = CaptureSource::new(
            Arc::new(backend),
            DeviceSelection::SystemDefault,
            format(48000, 2, SampleEncoding::F32),
            config,
        );
        let sink = Arc::new(QueueSink::new(
            "app",
            format(16000, 1, SampleEncoding::I16),
            8,
        ));
        let rx = sink.receiver();

        let relay = Relay::new(source, sink);
        assert_eq!(
            relay.source().output_format(),
            format(16000, 1, SampleEncoding::I16)
        );
        relay.start().await.unwrap();

        let chunk = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chunk.sample_rate, 16000);
        assert_eq!(chunk.channels, 1);
        assert_eq!(chunk.frame_count(), 160);
        assert!(matches!(chunk.samples, Samples::I16(_)));

        relay.stop().await;
        assert!(relay.is_disconnected());
        assert!(relay.stats().source.delivered >= 1);
    }

    #[tokio::test]
    async fn test_disconnected_resolves_on_termination() {
        let backend = MockBackend::new()
            .with_period(Duration::from_millis(1))
            .with_input_limit(2)
            .terminate_after_input();
        let fmt = format(16000, 1, SampleEncoding::I16);

        let source = CaptureSource::new(
            Arc::new(backend),
            DeviceSelection::SystemDefault,
            fmt,
            StreamConfig::default(),
        );
        let relay = Relay::new(source, Arc::new(QueueSink::new("app", fmt, 8)));
        relay.start().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), relay.disconnected())
            .await
            .unwrap();
        relay.stop().await;
    }

    #[tokio::test]
    async fn test_failed_source_closes_sink() {
        let fmt = format(16000, 1, SampleEncoding::I16);
        let source = CaptureSource::new(
            Arc::new(MockBackend::new()),
            DeviceSelection::by_name("missing"),
            fmt,
            StreamConfig::default(),
        );
        let sink = Arc::new(QueueSink::new("app", fmt, 8));

        let relay = Relay::new(source, sink.clone());
        let err = relay.start().await.unwrap_err();
        assert!(matches!(err, RelayError::DeviceNotFound { .. }));
        assert!(sink.buffer().is_closed());
    }
}
