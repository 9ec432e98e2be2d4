//! A backend that drives callbacks from a plain thread at a fixed period.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use super::{
    select_device, AudioBackend, DeviceInfo, InputCallback, OutputCallback, StreamHandle,
    TerminationCallback, Terminator,
};
use crate::config::DeviceSelection;
use crate::error::RelayError;
use crate::format::{AudioFormat, Sample, SampleEncoding, Samples};
use crate::source::{MockSignal, Waveform};

/// Simulated hardware for tests and CI.
///
/// Input streams emit chunks of a [`Waveform`] every `period`. Output streams
/// call the render callback every `period` and record what it produced.
///
/// # Example
///
/// ```
/// use audio_relay::backend::{AudioBackend, MockBackend};
///
/// let backend = MockBackend::new();
/// assert_eq!(backend.list_devices().unwrap().len(), 1);
/// ```
#[derive(Clone)]
pub struct MockBackend {
    devices: Vec<DeviceInfo>,
    waveform: Waveform,
    period: Duration,
    input_chunks: Option<usize>,
    terminate_after_input: bool,
    output_frames: usize,
    rendered: Arc<Mutex<Vec<Samples>>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// A backend with one duplex "Mock Device", silence, and a 10ms period.
    pub fn new() -> Self {
        Self {
            devices: vec![DeviceInfo {
                id: "mock:0".to_string(),
                name: "Mock Device".to_string(),
                max_input_channels: 2,
                max_output_channels: 2,
                default_sample_rate: 48000,
            }],
            waveform: Waveform::Silence,
            period: Duration::from_millis(10),
            input_chunks: None,
            terminate_after_input: false,
            output_frames: 480,
            rendered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replaces the simulated device list.
    #[must_use]
    pub fn with_devices(mut self, devices: Vec<DeviceInfo>) -> Self {
        self.devices = devices;
        self
    }

    /// Sets the signal captured by input streams.
    #[must_use]
    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }

    /// Sets the callback period.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Stops input streams after `chunks` chunks.
    #[must_use]
    pub fn with_input_limit(mut self, chunks: usize) -> Self {
        self.input_chunks = Some(chunks);
        self
    }

    /// Reports a stream termination once the input limit is reached.
    #[must_use]
    pub fn terminate_after_input(mut self) -> Self {
        self.terminate_after_input = true;
        self
    }

    /// Frames requested per output callback.
    #[must_use]
    pub fn with_output_frames(mut self, frames: usize) -> Self {
        self.output_frames = frames.max(1);
        self
    }

    /// Everything output streams have rendered so far, one entry per callback.
    pub fn rendered(&self) -> Vec<Samples> {
        self.rendered.lock().clone()
    }

    fn spawn_worker(
        name: &str,
        body: impl FnOnce(Arc<AtomicBool>) + Send + 'static,
    ) -> Result<StreamHandle, RelayError> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread: JoinHandle<()> = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(thread_stop))?;

        Ok(StreamHandle::new(move || {
            stop.store(true, Ordering::SeqCst);
            let _ = thread.join();
        }))
    }
}

fn render<T: Sample>(len: usize, on_output: &mut OutputCallback) -> Samples {
    let mut buffer = vec![T::SILENCE; len];
    on_output(T::wrap_mut(&mut buffer));
    T::into_samples(buffer)
}

fn render_any(encoding: SampleEncoding, len: usize, on_output: &mut OutputCallback) -> Samples {
    match encoding {
        SampleEncoding::I8 => render::<i8>(len, on_output),
        SampleEncoding::I16 => render::<i16>(len, on_output),
        SampleEncoding::I32 => render::<i32>(len, on_output),
        SampleEncoding::F32 => render::<f32>(len, on_output),
        SampleEncoding::F64 => render::<f64>(len, on_output),
    }
}

impl AudioBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>, RelayError> {
        Ok(self.devices.clone())
    }

    fn open_input_stream(
        &self,
        device: &DeviceSelection,
        format: AudioFormat,
        chunk_frames: usize,
        mut on_chunk: InputCallback,
        on_terminate: TerminationCallback,
    ) -> Result<StreamHandle, RelayError> {
        select_device(&self.devices, device, "input")?;

        let mut signal = MockSignal::new(format, self.waveform);
        let period = self.period;
        let limit = self.input_chunks;
        let terminate_at_end = self.terminate_after_input;
        let terminator = Terminator::new(on_terminate);
        let chunk_frames = chunk_frames.max(1);

        Self::spawn_worker("mock-input", move |stop| {
            let mut emitted = 0usize;
            while !stop.load(Ordering::SeqCst) {
                if limit.is_some_and(|n| emitted >= n) {
                    if terminate_at_end {
                        terminator.fire("mock input exhausted");
                    }
                    return;
                }

                let chunk = signal.next_chunk(chunk_frames);
                if catch_unwind(AssertUnwindSafe(|| on_chunk(chunk))).is_err() {
                    terminator.fire("input callback panicked");
                    return;
                }
                emitted += 1;
                std::thread::sleep(period);
            }
        })
    }

    fn open_output_stream(
        &self,
        device: &DeviceSelection,
        format: AudioFormat,
        mut on_output: OutputCallback,
        on_terminate: TerminationCallback,
    ) -> Result<StreamHandle, RelayError> {
        select_device(&self.devices, device, "output")?;

        let period = self.period;
        let len = self.output_frames * usize::from(format.channels());
        let rendered = self.rendered.clone();
        let terminator = Terminator::new(on_terminate);

        Self::spawn_worker("mock-output", move |stop| {
            while !stop.load(Ordering::SeqCst) {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    render_any(format.encoding(), len, &mut on_output)
                }));
                match result {
                    Ok(samples) => rendered.lock().push(samples),
                    Err(_) => {
                        terminator.fire("output callback panicked");
                        return;
                    }
                }
                std::thread::sleep(period);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SamplesMut;
    use crate::AudioChunk;
    use std::sync::atomic::AtomicUsize;

    fn mono_i16() -> AudioFormat {
        AudioFormat::new(16000, 1, SampleEncoding::I16).unwrap()
    }

    #[test]
    fn test_input_limit_and_termination() {
        let backend = MockBackend::new()
            .with_waveform(Waveform::Sequence)
            .with_period(Duration::from_millis(1))
            .with_input_limit(3)
            .terminate_after_input();

        let chunks = Arc::new(Mutex::new(Vec::new()));
        let (term_tx, term_rx) = crossbeam_channel::bounded(1);

        let c = chunks.clone();
        let mut handle = backend
            .open_input_stream(
                &DeviceSelection::SystemDefault,
                mono_i16(),
                160,
                Box::new(move |chunk: AudioChunk| c.lock().push(chunk)),
                Box::new(move |reason: String| {
                    let _ = term_tx.send(reason);
                }),
            )
            .unwrap();

        let reason = term_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(reason, "mock input exhausted");
        handle.close();

        let chunks = chunks.lock();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.frame_count() == 160));
    }

    #[test]
    fn test_close_stops_callbacks() {
        let backend = MockBackend::new().with_period(Duration::from_millis(1));
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();

        let mut handle = backend
            .open_input_stream(
                &DeviceSelection::SystemDefault,
                mono_i16(),
                16,
                Box::new(move |_: AudioChunk| {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
                Box::new(|_: String| {}),
            )
            .unwrap();

        std::thread::sleep(Duration::from_millis(20));
        handle.close();
        let after_close = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), after_close);
    }

    #[test]
    fn test_output_records_rendered_samples() {
        let backend = MockBackend::new()
            .with_period(Duration::from_millis(1))
            .with_output_frames(4);

        let mut handle = backend
            .open_output_stream(
                &DeviceSelection::SystemDefault,
                mono_i16(),
                Box::new(|out: SamplesMut<'_>| {
                    if let SamplesMut::I16(buf) = out {
                        buf.fill(7);
                    }
                }),
                Box::new(|_: String| {}),
            )
            .unwrap();

        std::thread::sleep(Duration::from_millis(20));
        handle.close();

        let rendered = backend.rendered();
        assert!(!rendered.is_empty());
        assert!(rendered.iter().all(|s| *s == Samples::I16(vec![7; 4])));
    }

    #[test]
    fn test_unknown_device() {
        let backend = MockBackend::new();
        let err = backend
            .open_input_stream(
                &DeviceSelection::by_name("nope"),
                mono_i16(),
                16,
                Box::new(|_: AudioChunk| {}),
                Box::new(|_: String| {}),
            )
            .unwrap_err();
        assert!(matches!(err, RelayError::DeviceNotFound { .. }));
    }

    #[test]
    fn test_panicking_callback_terminates() {
        let backend = MockBackend::new().with_period(Duration::from_millis(1));
        let (term_tx, term_rx) = crossbeam_channel::bounded(1);

        let _handle = backend
            .open_input_stream(
                &DeviceSelection::SystemDefault,
                mono_i16(),
                16,
                Box::new(|_: AudioChunk| panic!("boom")),
                Box::new(move |reason: String| {
                    let _ = term_tx.send(reason);
                }),
            )
            .unwrap();

        let reason = term_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(reason, "input callback panicked");
    }
}
