//! Hardware capture source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::core::{Delivery, DisconnectHandler, DisconnectNotifier, SourceCore, SourceStats};
use super::Source;
use crate::backend::{AudioBackend, InputCallback, StreamHandle, TerminationCallback};
use crate::config::{DeviceSelection, StreamConfig};
use crate::error::RelayError;
use crate::event::{emit, DropReason, EventCallback, StreamEvent};
use crate::format::AudioFormat;
use crate::pipeline::{SchedulerBridge, SubmitError, WaitError};
use crate::sink::Sink;
use crate::AudioChunk;

/// Retries when the bridge queue is full while reporting a termination.
const TERMINATION_SUBMIT_ATTEMPTS: u32 = 50;

type StreamSlot = Arc<Mutex<Option<StreamHandle>>>;

/// Captures audio from a device through an [`AudioBackend`].
///
/// The backend's callback runs on a real-time thread. Each chunk is handed
/// to a [`SchedulerBridge`] and delivered to the sink on the tokio runtime;
/// the callback waits at most [`StreamConfig::bridge_wait`] for that and
/// counts the chunk as dropped otherwise.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use audio_relay::{CaptureSource, QueueSink, Source, Sink, StreamConfig, DeviceSelection};
/// use audio_relay::backend::MockBackend;
/// use audio_relay::format::{AudioFormat, SampleEncoding};
///
/// # async fn run() -> Result<(), audio_relay::RelayError> {
/// let format = AudioFormat::new(16000, 1, SampleEncoding::I16)?;
/// let sink = Arc::new(QueueSink::new("app", format, 32));
///
/// let mut source = CaptureSource::new(
///     Arc::new(MockBackend::new()),
///     DeviceSelection::input(None),
///     format,
///     StreamConfig::default(),
/// );
/// source.wire_to(sink.clone());
/// source.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct CaptureSource {
    core: SourceCore,
    backend: Arc<dyn AudioBackend>,
    device: DeviceSelection,
    config: StreamConfig,
    bridge: Mutex<Option<Arc<SchedulerBridge>>>,
    stream: StreamSlot,
    terminated: Arc<AtomicBool>,
}

impl CaptureSource {
    /// Creates a source capturing `format` from `device`.
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        device: DeviceSelection,
        format: AudioFormat,
        config: StreamConfig,
    ) -> Self {
        Self {
            core: SourceCore::new("capture", format),
            backend,
            device,
            config,
            bridge: Mutex::new(None),
            stream: Arc::new(Mutex::new(None)),
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sets the name used in logs and events.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.core.set_name(name);
        self
    }

    /// Sets the event callback.
    #[must_use]
    pub fn with_events(mut self, events: EventCallback) -> Self {
        self.core.set_events(events);
        self
    }

    /// Returns `true` while the capture stream is open.
    pub fn is_running(&self) -> bool {
        self.core.is_running() && !self.terminated.load(Ordering::Acquire)
    }

    fn input_callback(&self, bridge: Arc<SchedulerBridge>, delivery: Delivery) -> InputCallback {
        let counters = self.core.counters();
        let events = self.core.events().cloned();
        let name = self.core.name().to_string();
        let wait = self.config.bridge_wait;

        Box::new(move |chunk: AudioChunk| {
            let delivery = delivery.clone();
            let report = counters.clone();
            let events = events.clone();
            let name = name.clone();
            let job = async move {
                report.report_bridge_drops(&name, events.as_ref());
                delivery.deliver(chunk).await
            };

            match bridge.submit(job) {
                Ok(submission) => match submission.wait(wait) {
                    // A detached job still runs and counts its own outcome.
                    Ok(_) | Err(WaitError::Detached) => {}
                    Err(WaitError::Abandoned) => {
                        counters.record_bridge_drop(DropReason::BridgeTimeout);
                    }
                },
                Err(SubmitError::Full) => counters.record_bridge_drop(DropReason::BridgeRejected),
                Err(SubmitError::Closed) => {}
            }
        })
    }

    fn termination_callback(&self, bridge: Arc<SchedulerBridge>) -> TerminationCallback {
        let ctx = Termination {
            name: self.core.name().to_string(),
            events: self.core.events().cloned(),
            notifier: self.core.notifier(),
            stream: self.stream.clone(),
        };
        let terminated = self.terminated.clone();
        let retry = self.config.bridge_wait;

        Box::new(move |reason: String| {
            terminated.store(true, Ordering::Release);
            // The stream is already dead here, so waiting for queue space is harmless.
            for _ in 0..TERMINATION_SUBMIT_ATTEMPTS {
                match bridge.submit(ctx.clone().run(reason.clone())) {
                    Ok(_) | Err(SubmitError::Closed) => return,
                    Err(SubmitError::Full) => std::thread::sleep(retry),
                }
            }
        })
    }
}

/// What the runtime side does when the backend reports a dead stream.
#[derive(Clone)]
struct Termination {
    name: String,
    events: Option<EventCallback>,
    notifier: Arc<DisconnectNotifier>,
    stream: StreamSlot,
}

impl Termination {
    async fn run(self, reason: String) {
        tracing::warn!(source = %self.name, %reason, "Capture stream terminated");
        close_stream(&self.stream).await;
        emit(
            self.events.as_ref(),
            StreamEvent::StreamTerminated {
                component: self.name,
                reason,
            },
        );
        self.notifier.fire();
    }
}

async fn close_stream(slot: &StreamSlot) {
    let handle = slot.lock().take();
    if let Some(mut handle) = handle {
        // Closing joins the stream thread.
        let _ = tokio::task::spawn_blocking(move || handle.close()).await;
    }
}

#[async_trait]
impl Source for CaptureSource {
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
        // Fail before touching the device if there is nowhere to deliver.
        let delivery = self.core.delivery()?;
        let _lifecycle = self.core.lifecycle().await;
        if !self.core.begin() {
            return Ok(());
        }

        let bridge = match SchedulerBridge::spawn(
            format!("{}-bridge", self.core.name()),
            self.config.bridge_queue_depth,
        ) {
            Ok(bridge) => Arc::new(bridge),
            Err(e) => {
                self.core.abort_start();
                return Err(e);
            }
        };

        let on_chunk = self.input_callback(bridge.clone(), delivery);
        let on_terminate = self.termination_callback(bridge.clone());
        let backend = self.backend.clone();
        let device = self.device.clone();
        let format = self.core.native_format();
        let chunk_frames = self.config.chunk_frames;

        let opened = tokio::task::spawn_blocking(move || {
            backend.open_input_stream(&device, format, chunk_frames, on_chunk, on_terminate)
        })
        .await
        .map_err(RelayError::backend)
        .and_then(|result| result);

        let handle = match opened {
            Ok(handle) => handle,
            Err(e) => {
                bridge.shutdown(self.config.shutdown_grace).await;
                self.core.abort_start();
                return Err(e);
            }
        };

        *self.stream.lock() = Some(handle);
        *self.bridge.lock() = Some(bridge);

        // The stream may have ended before its handle was stored.
        if self.terminated.load(Ordering::Acquire) {
            close_stream(&self.stream).await;
        }

        tracing::info!(
            source = %self.core.name(),
            backend = %self.backend.name(),
            format = %format,
            chunk_frames,
            "Capture started"
        );
        Ok(())
    }

    async fn stop(&self) {
        // Waits out a start in progress, so a stream it opens is closed here.
        let _lifecycle = self.core.lifecycle().await;
        if !self.core.mark_stopped() {
            return;
        }

        // No callbacks run once the stream is closed, so nothing new reaches the bridge.
        close_stream(&self.stream).await;

        let bridge = self.bridge.lock().take();
        if let Some(bridge) = bridge {
            bridge.shutdown(self.config.shutdown_grace).await;
        }

        self.core
            .counters()
            .report_bridge_drops(self.core.name(), self.core.events());
        self.core.notifier().fire();

        let stats = self.core.stats();
        tracing::info!(
            source = %self.core.name(),
            delivered = stats.delivered,
            dropped = stats.dropped,
            "Capture stopped"
        );
    }

    fn stats(&self) -> SourceStats {
        self.core.stats()
    }
}
