//! In-process sink whose consumer is the application.

use std::sync::Arc;

use async_trait::async_trait;

use crate::event::EventCallback;
use crate::format::AudioFormat;
use crate::pipeline::{BackpressurePolicy, BoundedChunkBuffer, PushOutcome};
use crate::sink::Sink;
use crate::AudioChunk;

/// A sink that hands chunks to application code.
///
/// This is the primary way to receive audio in-process (transcription,
/// analysis, etc.). The consumer pulls with [`QueueReceiver::recv`].
///
/// # Example
///
/// ```
/// use audio_relay::{AudioChunk, QueueSink, Sink};
/// use audio_relay::format::{AudioFormat, SampleEncoding};
///
/// # tokio_test_block(async {
/// let format = AudioFormat::new(16000, 1, SampleEncoding::I16).unwrap();
/// let sink = QueueSink::new("app", format, 32);
/// let rx = sink.receiver();
///
/// sink.push_chunk(AudioChunk::new(vec![1i16, 2, 3], 16000, 1)).await;
/// let chunk = rx.recv().await.unwrap();
/// assert_eq!(chunk.frame_count(), 3);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
pub struct QueueSink {
    name: String,
    format: AudioFormat,
    buffer: Arc<BoundedChunkBuffer>,
    policy: BackpressurePolicy,
}

impl QueueSink {
    /// Creates a sink holding up to `capacity` chunks. Pushes suspend when full.
    pub fn new(name: impl Into<String>, format: AudioFormat, capacity: usize) -> Self {
        let name = name.into();
        Self {
            buffer: Arc::new(BoundedChunkBuffer::new(name.clone(), capacity)),
            name,
            format,
            policy: BackpressurePolicy::Suspend,
        }
    }

    /// Sets the backpressure policy.
    #[must_use]
    pub fn with_policy(mut self, policy: BackpressurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the event callback for drop notifications.
    #[must_use]
    pub fn with_events(self, events: EventCallback) -> Self {
        self.buffer.set_events(events);
        self
    }

    /// Returns a handle for consuming chunks. May be called more than once.
    pub fn receiver(&self) -> QueueReceiver {
        QueueReceiver {
            buffer: self.buffer.clone(),
        }
    }

    /// The underlying buffer, for observing depth and drops.
    pub fn buffer(&self) -> &BoundedChunkBuffer {
        &self.buffer
    }
}

#[async_trait]
impl Sink for QueueSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    async fn push_chunk(&self, chunk: AudioChunk) -> PushOutcome {
        self.buffer.push(chunk, self.policy).await
    }

    fn clear(&self) -> usize {
        self.buffer.clear()
    }

    async fn close(&self) {
        if self.buffer.close() {
            tracing::debug!(sink = %self.name, "Queue sink closed");
        }
    }

    fn depth(&self) -> usize {
        self.buffer.depth()
    }
}

/// The consuming end of a [`QueueSink`].
#[derive(Clone)]
pub struct QueueReceiver {
    buffer: Arc<BoundedChunkBuffer>,
}

impl QueueReceiver {
    /// Waits for the next chunk. Returns `None` once the sink is closed.
    pub async fn recv(&self) -> Option<AudioChunk> {
        loop {
            if let Some(chunk) = self.buffer.pop() {
                return Some(chunk);
            }
            if !self.buffer.readable().await {
                return None;
            }
        }
    }

    /// Takes the next chunk if one is queued.
    pub fn try_recv(&self) -> Option<AudioChunk> {
        self.buffer.pop()
    }

    /// Chunks waiting to be received.
    pub fn len(&self) -> usize {
        self.buffer.depth()
    }

    /// Returns `true` if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Sample, SampleEncoding};
    use std::time::Duration;

    fn format() -> AudioFormat {
        AudioFormat::new(16000, 1, SampleEncoding::I16).unwrap()
    }

    #[tokio::test]
    async fn test_queue_sink_delivers_in_order() {
        let sink = QueueSink::new("queue", format(), 4);
        let rx = sink.receiver();

        for i in 0..3i16 {
            let outcome = sink.push_chunk(AudioChunk::new(vec![i; 2], 16000, 1)).await;
            assert_eq!(outcome, PushOutcome::Queued);
        }
        assert_eq!(rx.len(), 3);

        for i in 0..3i16 {
            let chunk = rx.recv().await.unwrap();
            assert_eq!(i16::slice(&chunk.samples).unwrap(), &[i, i]);
        }
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_recv_returns_none_after_close() {
        let sink = QueueSink::new("queue", format(), 4);
        let rx = sink.receiver();

        let waiter = tokio::spawn(async move { rx.recv().await });
        tokio::time::sleep(Duration::from_millis(5)).await;

        sink.close().await;
        sink.close().await;
        assert!(waiter.await.unwrap().is_none());
        assert_eq!(
            sink.push_chunk(AudioChunk::new(vec![1i16], 16000, 1)).await,
            PushOutcome::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_policy() {
        let sink = QueueSink::new("queue", format(), 1)
            .with_policy(BackpressurePolicy::DropAfter(Duration::from_millis(5)));

        let chunk = AudioChunk::new(vec![1i16], 16000, 1);
        assert_eq!(sink.push_chunk(chunk.clone()).await, PushOutcome::Queued);
        assert_eq!(sink.push_chunk(chunk).await, PushOutcome::Dropped);
        assert_eq!(sink.buffer().dropped(), 1);
        assert_eq!(sink.depth(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let sink = QueueSink::new("queue", format(), 4);
        sink.push_chunk(AudioChunk::new(vec![1i16], 16000, 1)).await;
        sink.push_chunk(AudioChunk::new(vec![2i16], 16000, 1)).await;
        assert_eq!(sink.clear(), 2);
        assert_eq!(sink.depth(), 0);
    }
}
