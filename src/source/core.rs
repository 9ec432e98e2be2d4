//! Machinery shared by every source: delivery, lifecycle, disconnect notification.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::RelayError;
use crate::event::{emit, DropReason, EventCallback, StreamEvent};
use crate::format::{AudioFormat, FormatConverter};
use crate::pipeline::PushOutcome;
use crate::sink::Sink;
use crate::AudioChunk;

/// Delivery counters for one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Chunks the sink accepted.
    pub delivered: u64,
    /// Chunks lost to backpressure (sink drops and bridge drops).
    pub dropped: u64,
    /// Chunks with no frames, before or after conversion.
    pub skipped_empty: u64,
    /// Chunks that went through a non-identity conversion.
    pub converted: u64,
    /// Inbound messages that could not be decoded.
    pub malformed: u64,
}

#[derive(Default)]
pub(crate) struct SourceCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    skipped_empty: AtomicU64,
    converted: AtomicU64,
    malformed: AtomicU64,
    // Bridge drops seen on the real-time side, not yet reported.
    unreported_rejected: AtomicU64,
    unreported_timeouts: AtomicU64,
}

impl SourceCounters {
    pub(crate) fn snapshot(&self) -> SourceStats {
        SourceStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            skipped_empty: self.skipped_empty.load(Ordering::Relaxed),
            converted: self.converted.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_malformed(&self) -> u64 {
        self.malformed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Counts a chunk lost on the async side outside the sink's own policy.
    pub(crate) fn record_drop(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Counts a chunk the bridge never delivered. Safe on a real-time thread.
    pub(crate) fn record_bridge_drop(&self, reason: DropReason) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        let pending = match reason {
            DropReason::BridgeRejected => &self.unreported_rejected,
            _ => &self.unreported_timeouts,
        };
        pending.fetch_add(1, Ordering::Relaxed);
    }

    /// Logs and emits bridge drops recorded since the last call.
    pub(crate) fn report_bridge_drops(&self, component: &str, events: Option<&EventCallback>) {
        let rejected = self.unreported_rejected.swap(0, Ordering::Relaxed);
        let timeouts = self.unreported_timeouts.swap(0, Ordering::Relaxed);
        if rejected == 0 && timeouts == 0 {
            return;
        }

        tracing::warn!(
            source = %component,
            rejected,
            timeouts,
            "Real-time thread dropped chunks at the scheduler bridge"
        );
        let drops = std::iter::repeat(DropReason::BridgeRejected)
            .take(rejected as usize)
            .chain(std::iter::repeat(DropReason::BridgeTimeout).take(timeouts as usize));
        for reason in drops {
            emit(
                events,
                StreamEvent::ChunkDropped {
                    component: component.to_string(),
                    reason,
                },
            );
        }
    }
}

/// Called once when a source stops producing, for whatever reason.
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// Fires its handler at most once per source instance.
#[derive(Default)]
pub(crate) struct DisconnectNotifier {
    fired: AtomicBool,
    handler: Mutex<Option<DisconnectHandler>>,
}

impl DisconnectNotifier {
    pub(crate) fn set_handler(&self, handler: DisconnectHandler) {
        *self.handler.lock() = Some(handler);
    }

    /// Returns `true` if this call was the one that fired.
    pub(crate) fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler();
        }
        true
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// Everything needed to hand one chunk to the sink. Cheap to clone.
#[derive(Clone)]
pub(crate) struct Delivery {
    sink: Arc<dyn Sink>,
    converter: Option<Arc<FormatConverter>>,
    counters: Arc<SourceCounters>,
}

impl Delivery {
    /// Skips empty chunks, converts, pushes, and counts the outcome.
    pub(crate) async fn deliver(&self, chunk: AudioChunk) -> PushOutcome {
        if chunk.is_empty() {
            self.counters.skipped_empty.fetch_add(1, Ordering::Relaxed);
            return PushOutcome::Dropped;
        }

        let chunk = match &self.converter {
            Some(converter) => match converter.convert(chunk) {
                Some(converted) => {
                    self.counters.converted.fetch_add(1, Ordering::Relaxed);
                    converted
                }
                None => {
                    self.counters.skipped_empty.fetch_add(1, Ordering::Relaxed);
                    return PushOutcome::Dropped;
                }
            },
            None => chunk,
        };

        let outcome = self.sink.push_chunk(chunk).await;
        match outcome {
            PushOutcome::Queued => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::Dropped => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::Closed => {
                tracing::trace!(sink = %self.sink.name(), "Sink closed, chunk discarded");
            }
        }
        outcome
    }
}

/// State every source variant carries.
pub(crate) struct SourceCore {
    name: String,
    native: AudioFormat,
    sink: Option<Arc<dyn Sink>>,
    converter: Option<Arc<FormatConverter>>,
    counters: Arc<SourceCounters>,
    notifier: Arc<DisconnectNotifier>,
    events: Option<EventCallback>,
    started: AtomicBool,
    stopped: AtomicBool,
    // Set when the source ends without a stop call.
    ended: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl SourceCore {
    pub(crate) fn new(name: impl Into<String>, native: AudioFormat) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            name: name.into(),
            native,
            sink: None,
            converter: None,
            counters: Arc::default(),
            notifier: Arc::default(),
            events: None,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            ended: Arc::default(),
            shutdown,
            task: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub(crate) fn native_format(&self) -> AudioFormat {
        self.native
    }

    pub(crate) fn output_format(&self) -> AudioFormat {
        self.converter
            .as_ref()
            .map_or(self.native, |c| c.output_format())
    }

    pub(crate) fn set_events(&mut self, events: EventCallback) {
        self.events = Some(events);
    }

    pub(crate) fn events(&self) -> Option<&EventCallback> {
        self.events.as_ref()
    }

    pub(crate) fn wire_to(&mut self, sink: Arc<dyn Sink>) {
        self.sink = Some(sink);
    }

    /// Inserts a converter to `target`, or removes it when `target` is native.
    pub(crate) fn attach_conversion(&mut self, target: AudioFormat) {
        if target == self.native {
            self.converter = None;
            return;
        }

        let converter = FormatConverter::new(self.native, target);
        if !converter.channels_supported() {
            emit(
                self.events.as_ref(),
                StreamEvent::UnsupportedConversion {
                    component: self.name.clone(),
                    from: self.native,
                    to: target,
                },
            );
        }
        tracing::debug!(source = %self.name, from = %self.native, to = %target, "Conversion attached");
        self.converter = Some(Arc::new(converter));
    }

    pub(crate) fn set_disconnect_handler(&self, handler: DisconnectHandler) {
        self.notifier.set_handler(handler);
    }

    pub(crate) fn notifier(&self) -> Arc<DisconnectNotifier> {
        self.notifier.clone()
    }

    pub(crate) fn counters(&self) -> Arc<SourceCounters> {
        self.counters.clone()
    }

    pub(crate) fn stats(&self) -> SourceStats {
        self.counters.snapshot()
    }

    pub(crate) fn delivery(&self) -> Result<Delivery, RelayError> {
        let sink = self.sink.clone().ok_or_else(|| RelayError::NoSink {
            component: self.name.clone(),
        })?;
        Ok(Delivery {
            sink,
            converter: self.converter.clone(),
            counters: self.counters.clone(),
        })
    }

    /// Marks the source started. Returns `false` if it already was, or has stopped.
    pub(crate) fn begin(&self) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        !self.started.swap(true, Ordering::AcqRel)
    }

    /// Undoes [`begin`](Self::begin) after a failed start.
    pub(crate) fn abort_start(&self) {
        self.started.store(false, Ordering::Release);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire)
            && !self.stopped.load(Ordering::Acquire)
            && !self.ended.load(Ordering::Acquire)
    }

    /// Flag a background task sets when the source ends on its own.
    pub(crate) fn ended_flag(&self) -> Arc<AtomicBool> {
        self.ended.clone()
    }

    /// Held across `start` and `stop` so the two never interleave.
    pub(crate) async fn lifecycle(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lifecycle.lock().await
    }

    /// A receiver that turns `true` when the source is stopped.
    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) fn set_task(&self, task: JoinHandle<()>) {
        *self.task.lock() = Some(task);
    }

    /// Marks the source stopped and signals its task. Returns `true` only on the first call.
    pub(crate) fn mark_stopped(&self) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shutdown.send_replace(true);
        true
    }

    /// Waits up to `grace` for the background task, then aborts it.
    pub(crate) async fn join_task(&self, grace: Duration) {
        let Some(mut task) = self.task.lock().take() else {
            return;
        };
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            tracing::warn!(
                source = %self.name,
                grace_ms = grace.as_millis() as u64,
                "Source task did not finish in time, aborting"
            );
            task.abort();
            let _ = task.await;
        }
    }
}
