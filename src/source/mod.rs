//! Source trait and implementations for audio producers.
//!
//! A [`Source`] produces chunks on its own clock and delivers each one to the
//! sink it is wired to, through an optional format conversion.
//!
//! - [`CaptureSource`]: a hardware capture stream, bridged off the real-time thread
//! - [`NetworkSource`]: a TCP or WebSocket peer, or an application-owned connection
//! - [`MockSignal`]: synthetic chunks for tests

mod capture;
mod core;
mod mock;
mod network;

pub use self::core::{DisconnectHandler, SourceStats};
pub use capture::CaptureSource;
pub use mock::{MockSignal, Waveform};
pub use network::{ControlHandler, NetworkSource};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RelayError;
use crate::format::AudioFormat;
use crate::sink::Sink;

/// A producer of audio chunks.
///
/// Configuration methods take `&mut self` and must be called before
/// [`start`](Self::start). Lifecycle methods take `&self`, so a running
/// source can be stopped from any task.
///
/// # Lifecycle
///
/// 1. [`wire_to`](Self::wire_to) a sink, optionally
///    [`attach_conversion`](Self::attach_conversion) to the sink's format
/// 2. [`start`](Self::start) begins production (idempotent)
/// 3. [`stop`](Self::stop) halts production and flushes in-flight work
///    (idempotent); nothing is delivered after it returns
///
/// The disconnect handler fires exactly once per instance: when the peer or
/// device goes away, or on `stop`, whichever comes first.
#[async_trait]
pub trait Source: Send + Sync {
    /// Human-readable name for logging and events.
    fn name(&self) -> &str;

    /// The format chunks are produced in.
    fn native_format(&self) -> AudioFormat;

    /// The format chunks are delivered in.
    ///
    /// Equals [`native_format`](Self::native_format) unless a conversion is attached.
    fn output_format(&self) -> AudioFormat;

    /// Sets the sink chunks are delivered to.
    fn wire_to(&mut self, sink: Arc<dyn Sink>);

    /// Converts chunks to `target` before delivery.
    ///
    /// Attaching the native format removes any conversion.
    fn attach_conversion(&mut self, target: AudioFormat);

    /// Sets the handler called when the source stops producing.
    fn set_disconnect_handler(&mut self, handler: DisconnectHandler);

    /// Begins production.
    ///
    /// # Errors
    ///
    /// Returns an error if the device or connection cannot be opened, or if
    /// no sink is wired. A failed start can be retried.
    async fn start(&self) -> Result<(), RelayError>;

    /// Halts production. Safe to call concurrently and more than once.
    async fn stop(&self);

    /// Delivery counters so far.
    fn stats(&self) -> SourceStats;
}
