//! Sink trait and implementations for audio destinations.
//!
//! A [`Sink`] owns a [`BoundedChunkBuffer`](crate::pipeline::BoundedChunkBuffer)
//! that sources push into, and a consumer that drains it on its own clock:
//!
//! - [`PlaybackSink`]: a hardware output callback
//! - [`NetworkSink`]: a sender task writing to TCP or WebSocket
//! - [`QueueSink`]: the application, through a [`QueueReceiver`]
//!
//! You can implement the [`Sink`] trait for custom destinations.

mod network;
mod playback;
mod queue;

pub use network::NetworkSink;
pub use playback::{FillReport, PlaybackCursor, PlaybackSink, PlaybackStats};
pub use queue::{QueueReceiver, QueueSink};

use async_trait::async_trait;

use crate::error::RelayError;
use crate::format::AudioFormat;
use crate::pipeline::PushOutcome;
use crate::AudioChunk;

/// A destination for audio chunks.
///
/// # Implementation Notes
///
/// - Methods take `&self`; use interior mutability if needed
/// - `start` and `close` must be idempotent
/// - `push_chunk` must return [`PushOutcome::Closed`] without side effects
///   once the sink is closed, and nothing may be delivered after `close` returns
///
/// # Example
///
/// ```
/// use audio_relay::{AudioChunk, PushOutcome, Sink};
/// use audio_relay::format::{AudioFormat, SampleEncoding};
/// use async_trait::async_trait;
///
/// struct PrintSink {
///     format: AudioFormat,
/// }
///
/// #[async_trait]
/// impl Sink for PrintSink {
///     fn name(&self) -> &str {
///         "print"
///     }
///
///     fn format(&self) -> AudioFormat {
///         self.format
///     }
///
///     async fn push_chunk(&self, chunk: AudioChunk) -> PushOutcome {
///         println!("Received {} frames", chunk.frame_count());
///         PushOutcome::Queued
///     }
///
///     fn clear(&self) -> usize {
///         0
///     }
///
///     async fn close(&self) {}
///
///     fn depth(&self) -> usize {
///         0
///     }
/// }
/// ```
#[async_trait]
pub trait Sink: Send + Sync {
    /// Human-readable name for logging and events.
    fn name(&self) -> &str;

    /// The format this sink expects chunks in.
    fn format(&self) -> AudioFormat;

    /// Opens resources (connections, devices). Idempotent.
    ///
    /// Errors here are fatal and leave the sink unusable.
    async fn start(&self) -> Result<(), RelayError> {
        Ok(())
    }

    /// Offers a chunk, applying the sink's backpressure policy.
    async fn push_chunk(&self, chunk: AudioChunk) -> PushOutcome;

    /// Discards queued chunks, returning how many were removed.
    fn clear(&self) -> usize;

    /// Stops consumption and releases resources. Idempotent.
    async fn close(&self);

    /// Chunks currently queued.
    fn depth(&self) -> usize;
}
