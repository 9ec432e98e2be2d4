//! # audio-relay
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Real-time audio streaming between devices and network peers.
//!
//! `audio-relay` connects a [`Source`] (a capture device, a TCP or WebSocket
//! peer) to a [`Sink`] (a playback device, a network sender, your own code)
//! through one chunk-passing contract. Sample formats are converted on the
//! way, and a bounded buffer absorbs the timing mismatch between a
//! hardware callback and the async network side.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use audio_relay::{
//!     event_callback, CaptureSource, DeviceSelection, NetworkSink, Relay, StreamConfig,
//!     StreamEvent,
//! };
//! use audio_relay::backend::MockBackend;
//! use audio_relay::format::{AudioFormat, SampleEncoding};
//! use audio_relay::transport::Framing;
//!
//! # async fn run() -> Result<(), audio_relay::RelayError> {
//! let config = StreamConfig::default();
//! let events = event_callback(|e: StreamEvent| tracing::warn!(?e, "stream event"));
//!
//! let mic = CaptureSource::new(
//!     Arc::new(MockBackend::new()),
//!     DeviceSelection::input(None),
//!     AudioFormat::new(48000, 2, SampleEncoding::F32)?,
//!     config.clone(),
//! )
//! .with_events(events.clone());
//!
//! // Speech services usually want 16kHz mono PCM
//! let sink = NetworkSink::websocket(
//!     "ws://127.0.0.1:9000/audio",
//!     Framing::Typed,
//!     AudioFormat::new(16000, 1, SampleEncoding::I16)?,
//!     config,
//! )
//! .with_events(events);
//!
//! let relay = Relay::new(mic, Arc::new(sink));
//! relay.start().await?;
//! relay.disconnected().await;
//! relay.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict thread boundary:
//!
//! - **Real-time thread**: the backend's callback, which never awaits or logs
//! - **Scheduler Bridge**: a bounded hand-off from that thread to tokio
//! - **Tokio Runtime**: conversion, delivery, and network I/O
//!
//! Each sink owns a [`BoundedChunkBuffer`]. When it fills, the sink's
//! [`BackpressurePolicy`] either suspends the producer or drops the chunk
//! after a bounded wait and reports a [`StreamEvent::ChunkDropped`].

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

pub mod backend;
mod chunk;
mod config;
mod error;
mod event;
pub mod format;
mod pipeline;
mod relay;
mod sink;
pub mod source;
pub mod transport;

pub use chunk::AudioChunk;
pub use config::{DeviceSelection, StreamConfig, INPUT_DEVICE_ENV, OUTPUT_DEVICE_ENV};
pub use error::{MalformedMessage, RelayError, TransportError};
pub use event::{event_callback, DropReason, EventCallback, StreamEvent};
pub use pipeline::{
    BackpressurePolicy, BoundedChunkBuffer, PushOutcome, SchedulerBridge, SubmitError,
    Submission, TryPushError, WaitError,
};
pub use relay::{Relay, RelayStats};
pub use sink::{
    FillReport, NetworkSink, PlaybackCursor, PlaybackSink, PlaybackStats, QueueReceiver, QueueSink,
    Sink,
};
pub use source::{
    CaptureSource, ControlHandler, DisconnectHandler, NetworkSource, Source, SourceStats,
};
