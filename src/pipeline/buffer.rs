//! Bounded FIFO of audio chunks with backpressure.

use std::collections::VecDeque;
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::event::{emit, DropReason, EventCallback, StreamEvent};
use crate::AudioChunk;

/// What a sink does when a push finds its buffer full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Wait until space frees up or the buffer closes.
    Suspend,
    /// Wait at most this long, then drop the chunk.
    DropAfter(Duration),
}

/// Result of offering a chunk to a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The chunk was enqueued.
    Queued,
    /// The chunk was discarded (empty, or dropped under backpressure).
    Dropped,
    /// The buffer is closed; nothing was enqueued.
    Closed,
}

/// Why [`BoundedChunkBuffer::try_push`] did not enqueue.
#[derive(Debug, thiserror::Error)]
pub enum TryPushError {
    /// The buffer is at capacity. The chunk is handed back.
    #[error("buffer is full")]
    Full(AudioChunk),
    /// The buffer is closed.
    #[error("buffer is closed")]
    Closed(AudioChunk),
    /// Empty chunks are never queued.
    #[error("chunk has no frames")]
    Empty,
}

struct BufferState {
    queue: VecDeque<AudioChunk>,
    closed: bool,
    high_water: usize,
    dropped: u64,
}

/// A bounded, closeable FIFO of chunks owned by one sink.
///
/// Depth never exceeds capacity. Once closed, queued chunks are discarded,
/// suspended pushers and readers wake up, and further pushes are no-ops.
///
/// The lock is held only for O(1) queue operations and never across an
/// await, so [`pop`](Self::pop) is safe to call from a real-time callback.
pub struct BoundedChunkBuffer {
    name: String,
    capacity: usize,
    state: Mutex<BufferState>,
    space: Notify,
    data: Notify,
    events: OnceLock<EventCallback>,
}

impl BoundedChunkBuffer {
    /// Creates a buffer holding at most `capacity` chunks (minimum 1).
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            capacity,
            state: Mutex::new(BufferState {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
                high_water: 0,
                dropped: 0,
            }),
            space: Notify::new(),
            data: Notify::new(),
            events: OnceLock::new(),
        }
    }

    /// Attaches the callback that receives drop notifications.
    ///
    /// Only the first callback set is kept; returns `false` if one was already set.
    pub fn set_events(&self, events: EventCallback) -> bool {
        self.events.set(events).is_ok()
    }

    /// Offers a chunk, applying `policy` if the buffer is full.
    pub async fn push(&self, chunk: AudioChunk, policy: BackpressurePolicy) -> PushOutcome {
        if chunk.is_empty() {
            tracing::debug!(buffer = %self.name, "Rejecting empty chunk");
            return PushOutcome::Dropped;
        }

        match policy {
            BackpressurePolicy::Suspend => self.push_waiting(chunk).await,
            BackpressurePolicy::DropAfter(bound) => {
                match tokio::time::timeout(bound, self.push_waiting(chunk)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        let total = {
                            let mut state = self.state.lock();
                            state.dropped += 1;
                            state.dropped
                        };
                        tracing::warn!(
                            buffer = %self.name,
                            timeout_ms = bound.as_millis() as u64,
                            total_dropped = total,
                            "Buffer full, dropping chunk"
                        );
                        emit(
                            self.events.get(),
                            StreamEvent::ChunkDropped {
                                component: self.name.clone(),
                                reason: DropReason::BufferFull,
                            },
                        );
                        PushOutcome::Dropped
                    }
                }
            }
        }
    }

    async fn push_waiting(&self, mut chunk: AudioChunk) -> PushOutcome {
        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            // Register before checking so a pop between check and await isn't missed.
            notified.as_mut().enable();

            match self.try_push(chunk) {
                Ok(()) => return PushOutcome::Queued,
                Err(TryPushError::Full(back)) => chunk = back,
                Err(TryPushError::Closed(_)) => return PushOutcome::Closed,
                Err(TryPushError::Empty) => return PushOutcome::Dropped,
            }

            notified.await;
        }
    }

    /// Enqueues without waiting.
    pub fn try_push(&self, chunk: AudioChunk) -> Result<(), TryPushError> {
        if chunk.is_empty() {
            return Err(TryPushError::Empty);
        }
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(TryPushError::Closed(chunk));
            }
            if state.queue.len() >= self.capacity {
                return Err(TryPushError::Full(chunk));
            }
            state.queue.push_back(chunk);
            state.high_water = state.high_water.max(state.queue.len());
        }
        self.data.notify_waiters();
        Ok(())
    }

    /// Dequeues the oldest chunk without waiting.
    pub fn pop(&self) -> Option<AudioChunk> {
        let chunk = self.state.lock().queue.pop_front();
        if chunk.is_some() {
            self.space.notify_waiters();
        }
        chunk
    }

    /// Waits until a chunk is queued or the buffer closes.
    ///
    /// Returns `false` once the buffer is closed.
    pub async fn readable(&self) -> bool {
        loop {
            let notified = self.data.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state.lock();
                if !state.queue.is_empty() {
                    return true;
                }
                if state.closed {
                    return false;
                }
            }

            notified.await;
        }
    }

    /// Discards every queued chunk, returning how many were removed.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut state = self.state.lock();
            let n = state.queue.len();
            state.queue.clear();
            n
        };
        if removed > 0 {
            self.space.notify_waiters();
        }
        removed
    }

    /// Closes the buffer. Returns `true` only on the first call.
    pub fn close(&self) -> bool {
        let discarded = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            let n = state.queue.len();
            state.queue.clear();
            n
        };
        tracing::debug!(buffer = %self.name, discarded, "Buffer closed");
        self.space.notify_waiters();
        self.data.notify_waiters();
        true
    }

    /// Chunks currently queued.
    pub fn depth(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Maximum chunks the buffer holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Highest depth ever observed.
    pub fn high_water_mark(&self) -> usize {
        self.state.lock().high_water
    }

    /// Chunks dropped by the `DropAfter` policy.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }

    /// Name used in logs and events.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for BoundedChunkBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BoundedChunkBuffer")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("depth", &state.queue.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_callback;
    use crate::format::Sample;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn chunk(value: i16) -> AudioChunk {
        AudioChunk::new(vec![value; 4], 16000, 1)
    }

    fn first_sample(chunk: &AudioChunk) -> i16 {
        i16::slice(&chunk.samples).unwrap()[0]
    }

    // --- FIFO / capacity ---

    #[tokio::test]
    async fn test_fifo_order() {
        let buffer = BoundedChunkBuffer::new("test", 4);
        for i in 0..4 {
            assert_eq!(
                buffer.push(chunk(i), BackpressurePolicy::Suspend).await,
                PushOutcome::Queued
            );
        }
        for i in 0..4 {
            assert_eq!(first_sample(&buffer.pop().unwrap()), i);
        }
        assert!(buffer.pop().is_none());
    }

    #[test]
    fn test_try_push_full_returns_chunk() {
        let buffer = BoundedChunkBuffer::new("test", 1);
        buffer.try_push(chunk(1)).unwrap();
        match buffer.try_push(chunk(2)) {
            Err(TryPushError::Full(back)) => assert_eq!(first_sample(&back), 2),
            other => panic!("expected Full, got {:?}", other),
        }
        assert_eq!(buffer.depth(), 1);
    }

    #[test]
    fn test_empty_chunk_rejected() {
        let buffer = BoundedChunkBuffer::new("test", 2);
        let empty = AudioChunk::new(Vec::<i16>::new(), 16000, 1);
        assert!(matches!(buffer.try_push(empty), Err(TryPushError::Empty)));
        assert_eq!(buffer.depth(), 0);
    }

    #[test]
    fn test_zero_capacity_is_one() {
        let buffer = BoundedChunkBuffer::new("test", 0);
        assert_eq!(buffer.capacity(), 1);
    }

    #[test]
    fn test_high_water_mark() {
        let buffer = BoundedChunkBuffer::new("test", 8);
        for i in 0..5 {
            buffer.try_push(chunk(i)).unwrap();
        }
        buffer.pop();
        buffer.pop();
        buffer.try_push(chunk(9)).unwrap();
        assert_eq!(buffer.depth(), 4);
        assert_eq!(buffer.high_water_mark(), 5);
    }

    // --- Backpressure ---

    #[tokio::test(start_paused = true)]
    async fn test_drop_after_timeout() {
        let drops = Arc::new(AtomicUsize::new(0));
        let drops_cb = drops.clone();
        let on_event = event_callback(move |e: StreamEvent| {
            if let StreamEvent::ChunkDropped { reason, .. } = e {
                assert_eq!(reason, DropReason::BufferFull);
                drops_cb.fetch_add(1, Ordering::SeqCst);
            }
        });
        let buffer = BoundedChunkBuffer::new("test", 1);
        assert!(buffer.set_events(on_event.clone()));
        assert!(!buffer.set_events(on_event));

        buffer.try_push(chunk(1)).unwrap();
        let outcome = buffer
            .push(chunk(2), BackpressurePolicy::DropAfter(Duration::from_millis(20)))
            .await;

        assert_eq!(outcome, PushOutcome::Dropped);
        assert_eq!(buffer.dropped(), 1);
        assert_eq!(buffer.depth(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_after_succeeds_when_space_frees() {
        let buffer = Arc::new(BoundedChunkBuffer::new("test", 1));
        buffer.try_push(chunk(1)).unwrap();

        let consumer = buffer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            consumer.pop();
        });

        let outcome = buffer
            .push(chunk(2), BackpressurePolicy::DropAfter(Duration::from_secs(5)))
            .await;
        assert_eq!(outcome, PushOutcome::Queued);
        assert_eq!(buffer.dropped(), 0);
    }

    #[tokio::test]
    async fn test_suspend_waits_for_space() {
        let buffer = Arc::new(BoundedChunkBuffer::new("test", 1));
        buffer.try_push(chunk(1)).unwrap();

        let producer = buffer.clone();
        let pusher =
            tokio::spawn(async move { producer.push(chunk(2), BackpressurePolicy::Suspend).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!pusher.is_finished());
        assert_eq!(buffer.depth(), 1);

        assert_eq!(first_sample(&buffer.pop().unwrap()), 1);
        assert_eq!(pusher.await.unwrap(), PushOutcome::Queued);
        assert_eq!(first_sample(&buffer.pop().unwrap()), 2);
    }

    // --- Close / clear ---

    #[tokio::test]
    async fn test_push_after_close_is_noop() {
        let buffer = BoundedChunkBuffer::new("test", 2);
        assert!(buffer.close());
        assert!(!buffer.close());
        assert_eq!(
            buffer.push(chunk(1), BackpressurePolicy::Suspend).await,
            PushOutcome::Closed
        );
        assert_eq!(buffer.depth(), 0);
        assert!(buffer.pop().is_none());
    }

    #[tokio::test]
    async fn test_close_discards_and_wakes_suspended_pusher() {
        let buffer = Arc::new(BoundedChunkBuffer::new("test", 1));
        buffer.try_push(chunk(1)).unwrap();

        let producer = buffer.clone();
        let pusher =
            tokio::spawn(async move { producer.push(chunk(2), BackpressurePolicy::Suspend).await });
        tokio::time::sleep(Duration::from_millis(5)).await;

        buffer.close();
        assert_eq!(pusher.await.unwrap(), PushOutcome::Closed);
        assert_eq!(buffer.depth(), 0);
        assert!(buffer.is_closed());
    }

    #[test]
    fn test_clear_returns_count() {
        let buffer = BoundedChunkBuffer::new("test", 4);
        buffer.try_push(chunk(1)).unwrap();
        buffer.try_push(chunk(2)).unwrap();
        assert_eq!(buffer.clear(), 2);
        assert_eq!(buffer.depth(), 0);
        assert!(!buffer.is_closed());
    }

    // --- Readable ---

    #[tokio::test]
    async fn test_readable_wakes_on_push() {
        let buffer = Arc::new(BoundedChunkBuffer::new("test", 2));
        let reader = buffer.clone();
        let waiter = tokio::spawn(async move { reader.readable().await });

        tokio::time::sleep(Duration::from_millis(5)).await;
        buffer.try_push(chunk(1)).unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_readable_false_after_close() {
        let buffer = Arc::new(BoundedChunkBuffer::new("test", 2));
        let reader = buffer.clone();
        let waiter = tokio::spawn(async move { reader.readable().await });

        tokio::time::sleep(Duration::from_millis(5)).await;
        buffer.close();
        assert!(!waiter.await.unwrap());
    }

    // --- Overproduction ---

    #[tokio::test(start_paused = true)]
    async fn test_depth_plateaus_at_capacity() {
        let buffer = BoundedChunkBuffer::new("test", 3);
        let policy = BackpressurePolicy::DropAfter(Duration::from_millis(1));
        let mut queued = 0;
        for i in 0..10 {
            if buffer.push(chunk(i), policy).await == PushOutcome::Queued {
                queued += 1;
            }
            assert!(buffer.depth() <= 3);
        }
        assert_eq!(queued, 3);
        assert_eq!(buffer.dropped(), 7);
        assert_eq!(buffer.high_water_mark(), 3);
    }
}
