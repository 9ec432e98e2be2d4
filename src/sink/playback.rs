//! Hardware playback sink.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{AudioBackend, OutputCallback, StreamHandle, TerminationCallback};
use crate::config::{DeviceSelection, StreamConfig};
use crate::error::RelayError;
use crate::event::{emit, EventCallback, StreamEvent};
use crate::format::{AudioFormat, Sample, SamplesMut};
use crate::pipeline::{BackpressurePolicy, BoundedChunkBuffer, PushOutcome, SchedulerBridge};
use crate::sink::Sink;
use crate::AudioChunk;

/// Read position inside the chunk currently being played.
///
/// An output callback rarely asks for exactly one chunk's worth of samples,
/// so the partially played chunk and its offset are carried from one
/// invocation to the next.
///
/// # Example
///
/// ```
/// use audio_relay::{AudioChunk, BoundedChunkBuffer, PlaybackCursor};
/// use audio_relay::format::SamplesMut;
///
/// let buffer = BoundedChunkBuffer::new("out", 4);
/// buffer.try_push(AudioChunk::new(vec![1i16, 2, 3], 16000, 1)).unwrap();
///
/// let mut cursor = PlaybackCursor::new();
/// let mut out = [0i16; 2];
/// cursor.fill(SamplesMut::I16(&mut out), &buffer);
/// assert_eq!(out, [1, 2]);
/// assert_eq!(cursor.offset(), 2);
/// ```
#[derive(Debug, Default)]
pub struct PlaybackCursor {
    chunk: Option<AudioChunk>,
    offset: usize,
}

/// What one [`PlaybackCursor::fill`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillReport {
    /// Samples copied from chunks.
    pub written: usize,
    /// Samples zero-filled because the buffer ran dry.
    pub silence: usize,
    /// Chunks discarded because their encoding differs from the stream's.
    pub skipped: usize,
}

impl FillReport {
    /// Returns `true` if any part of the output was silence.
    pub fn underrun(&self) -> bool {
        self.silence > 0
    }
}

impl PlaybackCursor {
    /// A cursor with no chunk in progress.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the chunk in progress.
    pub fn reset(&mut self) {
        self.chunk = None;
        self.offset = 0;
    }

    /// Samples already played from the current chunk.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns `true` if no chunk is in progress.
    pub fn is_idle(&self) -> bool {
        self.chunk.is_none()
    }

    /// Fills `out` from the current chunk and then from `buffer`, never waiting.
    ///
    /// Whatever can't be filled is set to silence.
    pub fn fill(&mut self, out: SamplesMut<'_>, buffer: &BoundedChunkBuffer) -> FillReport {
        match out {
            SamplesMut::I8(out) => self.fill_typed(out, buffer),
            SamplesMut::I16(out) => self.fill_typed(out, buffer),
            SamplesMut::I32(out) => self.fill_typed(out, buffer),
            SamplesMut::F32(out) => self.fill_typed(out, buffer),
            SamplesMut::F64(out) => self.fill_typed(out, buffer),
        }
    }

    fn fill_typed<T: Sample>(&mut self, out: &mut [T], buffer: &BoundedChunkBuffer) -> FillReport {
        let mut report = FillReport::default();

        while report.written < out.len() {
            if self.chunk.is_none() {
                match buffer.pop() {
                    Some(chunk) if chunk.encoding() == T::ENCODING => {
                        self.chunk = Some(chunk);
                        self.offset = 0;
                    }
                    Some(_) => {
                        report.skipped += 1;
                        continue;
                    }
                    None => break,
                }
            }

            let Some(src) = self.chunk.as_ref().and_then(|c| T::slice(&c.samples)) else {
                self.reset();
                continue;
            };
            let n = (src.len() - self.offset).min(out.len() - report.written);
            out[report.written..report.written + n]
                .copy_from_slice(&src[self.offset..self.offset + n]);
            report.written += n;
            self.offset += n;

            if self.offset >= src.len() {
                self.reset();
            }
        }

        out[report.written..].fill(T::SILENCE);
        report.silence = out.len() - report.written;
        report
    }
}

/// Counters kept by the output callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    /// Callbacks that had to zero-fill some of their output.
    pub underruns: u64,
    /// Samples played from chunks.
    pub samples_played: u64,
    /// Chunks skipped for having the wrong encoding.
    pub skipped_chunks: u64,
}

#[derive(Default)]
struct Shared {
    generation: AtomicU64,
    underruns: AtomicU64,
    samples_played: AtomicU64,
    skipped_chunks: AtomicU64,
}

/// Plays chunks on an output device through an [`AudioBackend`].
///
/// The output callback drains the buffer without waiting, zero-fills on
/// underrun, and keeps a [`PlaybackCursor`] across invocations. Pushes
/// suspend while the buffer is full.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use audio_relay::{PlaybackSink, Sink, StreamConfig, DeviceSelection};
/// use audio_relay::backend::MockBackend;
/// use audio_relay::format::{AudioFormat, SampleEncoding};
///
/// # async fn run() -> Result<(), audio_relay::RelayError> {
/// let format = AudioFormat::new(48000, 2, SampleEncoding::F32)?;
/// let sink = PlaybackSink::new(
///     Arc::new(MockBackend::new()),
///     DeviceSelection::output(None),
///     format,
///     StreamConfig::default(),
/// );
/// sink.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct PlaybackSink {
    name: String,
    backend: Arc<dyn AudioBackend>,
    device: DeviceSelection,
    format: AudioFormat,
    config: StreamConfig,
    policy: BackpressurePolicy,
    buffer: Arc<BoundedChunkBuffer>,
    shared: Arc<Shared>,
    stream: Arc<Mutex<Option<StreamHandle>>>,
    bridge: Mutex<Option<Arc<SchedulerBridge>>>,
    events: Option<EventCallback>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl PlaybackSink {
    /// Creates a sink playing `format` on `device`.
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        device: DeviceSelection,
        format: AudioFormat,
        config: StreamConfig,
    ) -> Self {
        Self {
            name: "playback".to_string(),
            backend,
            device,
            format,
            policy: BackpressurePolicy::Suspend,
            buffer: Arc::new(BoundedChunkBuffer::new("playback", config.buffer_capacity)),
            config,
            shared: Arc::default(),
            stream: Arc::new(Mutex::new(None)),
            bridge: Mutex::new(None),
            events: None,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Sets the name used in logs and events.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Overrides the default `Suspend` policy.
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

    /// Output callback counters so far.
    pub fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            underruns: self.shared.underruns.load(Ordering::Relaxed),
            samples_played: self.shared.samples_played.load(Ordering::Relaxed),
            skipped_chunks: self.shared.skipped_chunks.load(Ordering::Relaxed),
        }
    }

    fn output_callback(&self) -> OutputCallback {
        let buffer = self.buffer.clone();
        let shared = self.shared.clone();
        let mut cursor = PlaybackCursor::new();
        let mut seen_generation = shared.generation.load(Ordering::Acquire);

        Box::new(move |out: SamplesMut<'_>| {
            let generation = shared.generation.load(Ordering::Acquire);
            if generation != seen_generation {
                cursor.reset();
                seen_generation = generation;
            }

            let report = cursor.fill(out, &buffer);
            shared
                .samples_played
                .fetch_add(report.written as u64, Ordering::Relaxed);
            if report.skipped > 0 {
                shared
                    .skipped_chunks
                    .fetch_add(report.skipped as u64, Ordering::Relaxed);
            }
            if report.underrun() {
                shared.underruns.fetch_add(1, Ordering::Relaxed);
            }
        })
    }

    fn termination_callback(&self, bridge: Arc<SchedulerBridge>) -> TerminationCallback {
        let name = self.name.clone();
        let buffer = self.buffer.clone();
        let stream = self.stream.clone();
        let events = self.events.clone();

        Box::new(move |reason: String| {
            let log_name = name.clone();
            let fallback = buffer.clone();
            let job = async move {
                tracing::warn!(sink = %name, %reason, "Playback stream terminated");
                buffer.close();
                close_stream(&stream).await;
                emit(
                    events.as_ref(),
                    StreamEvent::StreamTerminated {
                        component: name,
                        reason,
                    },
                );
            };
            // The stream is already dead, so logging here is off the real-time path.
            if let Err(e) = bridge.submit(job) {
                tracing::warn!(
                    sink = %log_name,
                    error = %e,
                    "Could not report playback termination"
                );
                fallback.close();
            }
        })
    }
}

async fn close_stream(slot: &Mutex<Option<StreamHandle>>) {
    let handle = slot.lock().take();
    if let Some(mut handle) = handle {
        let _ = tokio::task::spawn_blocking(move || handle.close()).await;
    }
}

#[async_trait]
impl Sink for PlaybackSink {
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

        let bridge = match SchedulerBridge::spawn(format!("{}-bridge", self.name), 1) {
            Ok(bridge) => Arc::new(bridge),
            Err(e) => {
                self.started.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let on_output = self.output_callback();
        let on_terminate = self.termination_callback(bridge.clone());
        let backend = self.backend.clone();
        let device = self.device.clone();
        let format = self.format;

        let opened = tokio::task::spawn_blocking(move || {
            backend.open_output_stream(&device, format, on_output, on_terminate)
        })
        .await
        .map_err(RelayError::backend)
        .and_then(|result| result);

        match opened {
            Ok(handle) => {
                *self.stream.lock() = Some(handle);
                *self.bridge.lock() = Some(bridge);
                tracing::info!(
                    sink = %self.name,
                    backend = %self.backend.name(),
                    format = %format,
                    "Playback started"
                );
                Ok(())
            }
            Err(e) => {
                bridge.shutdown(self.config.shutdown_grace).await;
                self.started.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    async fn push_chunk(&self, chunk: AudioChunk) -> PushOutcome {
        self.buffer.push(chunk, self.policy).await
    }

    fn clear(&self) -> usize {
        let removed = self.buffer.clear();
        // The callback drops its partial chunk when it sees the new generation.
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        removed
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.buffer.close();
        close_stream(&self.stream).await;

        let bridge = self.bridge.lock().take();
        if let Some(bridge) = bridge {
            bridge.shutdown(self.config.shutdown_grace).await;
        }

        let stats = self.stats();
        tracing::info!(
            sink = %self.name,
            underruns = stats.underruns,
            samples_played = stats.samples_played,
            "Playback closed"
        );
    }

    fn depth(&self) -> usize {
        self.buffer.depth()
    }
}
