//! Runtime events for monitoring stream health.
//!
//! Events are non-fatal notifications. The stream keeps running after an
//! event is emitted; they're for logging and metrics, not error handling.
//! Events are only ever emitted from async tasks, never from a real-time
//! audio callback.

use std::sync::Arc;

use crate::error::MalformedMessage;
use crate::format::AudioFormat;

/// Why a chunk was dropped instead of delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The sink buffer stayed full past the push timeout.
    BufferFull,
    /// The scheduler bridge queue was full.
    BridgeRejected,
    /// The real-time side stopped waiting for the bridged delivery.
    BridgeTimeout,
}

/// Runtime events emitted by sources and sinks.
///
/// # Example
///
/// ```
/// use audio_relay::StreamEvent;
///
/// fn handle_event(event: StreamEvent) {
///     match event {
///         StreamEvent::ChunkDropped { component, reason } => {
///             eprintln!("{component} dropped a chunk: {reason:?}");
///         }
///         StreamEvent::MalformedMessage { component, error } => {
///             eprintln!("{component} skipped a message: {error}");
///         }
///         StreamEvent::UnsupportedConversion { component, from, to } => {
///             eprintln!("{component} cannot remap {from} -> {to}");
///         }
///         StreamEvent::Disconnected { component, reason } => {
///             eprintln!("{component} disconnected: {reason}");
///         }
///         StreamEvent::StreamTerminated { component, reason } => {
///             eprintln!("{component} stream ended: {reason}");
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A chunk was discarded under backpressure.
    ChunkDropped {
        /// Name of the source or sink that dropped it.
        component: String,
        /// Why it was dropped.
        reason: DropReason,
    },

    /// An inbound network message was skipped.
    MalformedMessage {
        /// Name of the receiving source.
        component: String,
        /// What was wrong with it.
        error: MalformedMessage,
    },

    /// A converter was derived for a channel pair with no mixing rule.
    UnsupportedConversion {
        /// Name of the source the converter belongs to.
        component: String,
        /// Source format.
        from: AudioFormat,
        /// Requested target format.
        to: AudioFormat,
    },

    /// The peer closed or reset the connection.
    Disconnected {
        /// Name of the affected source or sink.
        component: String,
        /// Description of what happened.
        reason: String,
    },

    /// A hardware stream ended on its own (device unplugged, backend error).
    StreamTerminated {
        /// Name of the affected source or sink.
        component: String,
        /// What the backend reported.
        reason: String,
    },
}

/// Callback type for receiving runtime events.
///
/// # Example
///
/// ```
/// use audio_relay::event_callback;
///
/// let on_event = event_callback(|event| {
///     tracing::warn!(?event, "stream event");
/// });
/// ```
pub type EventCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(StreamEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Invokes an optional callback.
pub(crate) fn emit(callback: Option<&EventCallback>, event: StreamEvent) {
    if let Some(cb) = callback {
        cb(event);
    }
}
