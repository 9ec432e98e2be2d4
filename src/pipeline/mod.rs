//! Audio pipeline components.
//!
//! The pipeline carries chunks across the two scheduling domains:
//!
//! ```text
//! RT callback → Scheduler Bridge → Source delivery → Buffer → Sink consumer
//! ```
//!
//! - **Buffer**: bounded FIFO owned by a sink; full buffers suspend or drop
//!   according to the sink's [`BackpressurePolicy`]
//! - **Scheduler Bridge**: hands work from a real-time thread to the tokio
//!   runtime with a bounded wait
//!
//! A real-time callback never awaits. It submits to the bridge or pops from
//! a buffer and returns.

mod bridge;
mod buffer;

pub use bridge::{SchedulerBridge, SubmitError, Submission, WaitError};
pub use buffer::{BackpressurePolicy, BoundedChunkBuffer, PushOutcome, TryPushError};
