//! Audio hardware backends.
//!
//! A backend opens capture and playback streams whose callbacks run on a
//! real-time thread the backend owns. Callbacks must never block for long
//! and never log; they hand work off and return.
//!
//! - [`CpalBackend`]: real devices via CPAL (feature `cpal-backend`)
//! - [`MockBackend`]: a fixed-period thread, for tests and CI

#[cfg(feature = "cpal-backend")]
mod cpal_backend;
mod mock;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::DeviceSelection;
use crate::error::RelayError;
use crate::format::{AudioFormat, SamplesMut};
use crate::AudioChunk;

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::CpalBackend;
pub use mock::MockBackend;

/// Receives each captured chunk on the real-time thread.
pub type InputCallback = Box<dyn FnMut(AudioChunk) + Send>;

/// Fills each output buffer on the real-time thread.
pub type OutputCallback = Box<dyn FnMut(SamplesMut<'_>) + Send>;

/// Called at most once if the stream ends on its own.
pub type TerminationCallback = Box<dyn FnOnce(String) + Send>;

/// A physical (or simulated) audio device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Backend-specific identifier.
    pub id: String,
    /// Human-readable name, used by [`DeviceSelection::ByName`].
    pub name: String,
    /// Maximum capture channels (0 if output-only).
    pub max_input_channels: u16,
    /// Maximum playback channels (0 if input-only).
    pub max_output_channels: u16,
    /// The device's preferred sample rate.
    pub default_sample_rate: u32,
}

/// Capability interface to an audio backend.
pub trait AudioBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Enumerates available devices.
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, RelayError>;

    /// Opens a capture stream delivering `chunk_frames`-frame chunks in `format`.
    fn open_input_stream(
        &self,
        device: &DeviceSelection,
        format: AudioFormat,
        chunk_frames: usize,
        on_chunk: InputCallback,
        on_terminate: TerminationCallback,
    ) -> Result<StreamHandle, RelayError>;

    /// Opens a playback stream that asks `on_output` for every buffer.
    fn open_output_stream(
        &self,
        device: &DeviceSelection,
        format: AudioFormat,
        on_output: OutputCallback,
        on_terminate: TerminationCallback,
    ) -> Result<StreamHandle, RelayError>;
}

/// An open stream. Closing it (or dropping it) stops the callbacks.
///
/// Once [`close`](Self::close) returns, no further callback invocations
/// happen. `close` blocks until the stream's thread has finished, so call
/// it from a blocking context.
pub struct StreamHandle {
    closer: Option<Box<dyn FnOnce() + Send>>,
}

impl StreamHandle {
    /// Wraps the action that tears the stream down.
    pub fn new(closer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            closer: Some(Box::new(closer)),
        }
    }

    /// Stops the stream. Idempotent.
    pub fn close(&mut self) {
        if let Some(closer) = self.closer.take() {
            closer();
        }
    }

    /// Returns `true` until the stream has been closed.
    pub fn is_open(&self) -> bool {
        self.closer.is_some()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("open", &self.is_open())
            .finish()
    }
}

/// Shares one [`TerminationCallback`] between a stream's callbacks so it
/// fires at most once.
#[derive(Clone)]
pub(crate) struct Terminator(Arc<Mutex<Option<TerminationCallback>>>);

impl Terminator {
    pub(crate) fn new(callback: TerminationCallback) -> Self {
        Self(Arc::new(Mutex::new(Some(callback))))
    }

    pub(crate) fn fire(&self, reason: impl Into<String>) {
        let callback = self.0.lock().take();
        if let Some(callback) = callback {
            callback(reason.into());
        }
    }
}

/// Finds `selection` among `devices`, or the first device for the system default.
pub(crate) fn select_device<'a>(
    devices: &'a [DeviceInfo],
    selection: &DeviceSelection,
    direction: &'static str,
) -> Result<&'a DeviceInfo, RelayError> {
    let usable = |d: &&DeviceInfo| match direction {
        "input" => d.max_input_channels > 0,
        _ => d.max_output_channels > 0,
    };
    match selection {
        DeviceSelection::SystemDefault => devices
            .iter()
            .find(usable)
            .ok_or(RelayError::NoDefaultDevice { direction }),
        DeviceSelection::ByName(name) => devices
            .iter()
            .filter(usable)
            .find(|d| d.name == *name)
            .ok_or_else(|| RelayError::DeviceNotFound { name: name.clone() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn device(name: &str, inputs: u16, outputs: u16) -> DeviceInfo {
        DeviceInfo {
            id: name.to_lowercase(),
            name: name.to_string(),
            max_input_channels: inputs,
            max_output_channels: outputs,
            default_sample_rate: 48000,
        }
    }

    #[test]
    fn test_stream_handle_closes_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let c = closes.clone();
        let mut handle = StreamHandle::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(handle.is_open());
        handle.close();
        handle.close();
        drop(handle);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stream_handle_closes_on_drop() {
        let closes = Arc::new(AtomicUsize::new(0));
        let c = closes.clone();
        drop(StreamHandle::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_terminator_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let terminator = Terminator::new(Box::new(move |_: String| {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let other = terminator.clone();
        terminator.fire("first");
        other.fire("second");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_select_device() {
        let devices = vec![device("Speakers", 0, 2), device("Mic", 1, 0)];

        let input = select_device(&devices, &DeviceSelection::SystemDefault, "input").unwrap();
        assert_eq!(input.name, "Mic");

        let output = select_device(&devices, &DeviceSelection::by_name("Speakers"), "output");
        assert_eq!(output.unwrap().name, "Speakers");

        let missing = select_device(&devices, &DeviceSelection::by_name("Speakers"), "input");
        assert!(matches!(missing, Err(RelayError::DeviceNotFound { .. })));

        let none = select_device(&[], &DeviceSelection::SystemDefault, "output");
        assert!(matches!(
            none,
            Err(RelayError::NoDefaultDevice { direction: "output" })
        ));
    }
}
