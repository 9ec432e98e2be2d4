//! CPAL-backed capture and playback.
//!
//! A `cpal::Stream` is not `Send` on every platform, so each stream is built,
//! played and dropped on a dedicated thread. The [`StreamHandle`] only holds
//! the means to stop that thread.

use std::panic::{catch_unwind, AssertUnwindSafe};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, SizedSample, StreamConfig as CpalStreamConfig};

use super::{
    AudioBackend, DeviceInfo, InputCallback, OutputCallback, StreamHandle, TerminationCallback,
    Terminator,
};
use crate::config::DeviceSelection;
use crate::error::RelayError;
use crate::format::{AudioFormat, Sample, SampleEncoding};
use crate::AudioChunk;

/// Real audio devices through the platform's default CPAL host.
#[derive(Debug, Clone, Copy)]
pub struct CpalBackend {
    host_id: cpal::HostId,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalBackend {
    /// Uses the platform's default host.
    pub fn new() -> Self {
        Self {
            host_id: cpal::default_host().id(),
        }
    }
}

fn host(id: cpal::HostId) -> Result<cpal::Host, RelayError> {
    cpal::host_from_id(id).map_err(RelayError::backend)
}

fn find_device(
    host: &cpal::Host,
    selection: &DeviceSelection,
    direction: &'static str,
) -> Result<cpal::Device, RelayError> {
    let input = direction == "input";
    match selection {
        DeviceSelection::SystemDefault => {
            let device = if input {
                host.default_input_device()
            } else {
                host.default_output_device()
            };
            device.ok_or(RelayError::NoDefaultDevice { direction })
        }
        DeviceSelection::ByName(name) => {
            let devices: Vec<cpal::Device> = if input {
                host.input_devices().map_err(RelayError::backend)?.collect()
            } else {
                host.output_devices().map_err(RelayError::backend)?.collect()
            };
            devices
                .into_iter()
                .find(|d| d.name().ok().as_deref() == Some(name.as_str()))
                .ok_or_else(|| RelayError::DeviceNotFound { name: name.clone() })
        }
    }
}

fn stream_config(format: AudioFormat) -> CpalStreamConfig {
    CpalStreamConfig {
        channels: format.channels(),
        sample_rate: SampleRate(format.sample_rate()),
        buffer_size: BufferSize::Default,
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> RelayError {
    match err {
        cpal::BuildStreamError::StreamConfigNotSupported
        | cpal::BuildStreamError::InvalidArgument => RelayError::format_unsupported(err.to_string()),
        other => RelayError::backend(other),
    }
}

fn on_stream_error(terminator: &Terminator, err: cpal::StreamError) {
    match err {
        cpal::StreamError::DeviceNotAvailable => terminator.fire("device no longer available"),
        cpal::StreamError::BackendSpecific { err } => {
            tracing::warn!(error = %err, "Audio backend reported a stream error");
        }
    }
}

/// Builds and plays a stream on its own thread, returning once it is running.
fn run_on_thread<B>(name: &str, build: B) -> Result<StreamHandle, RelayError>
where
    B: FnOnce() -> Result<cpal::Stream, RelayError> + Send + 'static,
{
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), RelayError>>(1);
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

    let thread = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match build() {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(RelayError::backend(e)));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // Park until the handle is closed (or dropped).
            let _ = stop_rx.recv();
            drop(stream);
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(StreamHandle::new(move || {
            let _ = stop_tx.send(());
            let _ = thread.join();
        })),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread.join();
            Err(RelayError::backend("audio stream thread exited during setup"))
        }
    }
}

fn build_input<T>(
    device: &cpal::Device,
    format: AudioFormat,
    chunk_frames: usize,
    mut on_chunk: InputCallback,
    terminator: Terminator,
) -> Result<cpal::Stream, RelayError>
where
    T: SizedSample + Sample,
{
    let config = stream_config(format);
    let rate = format.sample_rate();
    let channels = format.channels();
    let chunk_len = chunk_frames.max(1) * usize::from(channels);

    let mut pending: Vec<T> = Vec::with_capacity(chunk_len);
    let mut failed = false;
    let data_terminator = terminator.clone();

    device
        .build_input_stream(
            &config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if failed {
                    return;
                }
                // Re-slice whatever the driver hands us into fixed-size chunks.
                let mut rest = data;
                while !rest.is_empty() {
                    let take = (chunk_len - pending.len()).min(rest.len());
                    pending.extend_from_slice(&rest[..take]);
                    rest = &rest[take..];

                    if pending.len() == chunk_len {
                        let full = std::mem::replace(&mut pending, Vec::with_capacity(chunk_len));
                        let chunk = AudioChunk::new(T::into_samples(full), rate, channels);
                        if catch_unwind(AssertUnwindSafe(|| on_chunk(chunk))).is_err() {
                            failed = true;
                            data_terminator.fire("input callback panicked");
                            return;
                        }
                    }
                }
            },
            move |err| on_stream_error(&terminator, err),
            None,
        )
        .map_err(map_build_error)
}

fn build_output<T>(
    device: &cpal::Device,
    format: AudioFormat,
    mut on_output: OutputCallback,
    terminator: Terminator,
) -> Result<cpal::Stream, RelayError>
where
    T: SizedSample + Sample,
{
    let config = stream_config(format);
    let mut failed = false;
    let data_terminator = terminator.clone();

    device
        .build_output_stream(
            &config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if failed {
                    data.fill(T::SILENCE);
                    return;
                }
                if catch_unwind(AssertUnwindSafe(|| on_output(T::wrap_mut(data)))).is_err() {
                    failed = true;
                    data.fill(T::SILENCE);
                    data_terminator.fire("output callback panicked");
                }
            },
            move |err| on_stream_error(&terminator, err),
            None,
        )
        .map_err(map_build_error)
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        self.host_id.name()
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>, RelayError> {
        let host = host(self.host_id)?;
        let devices = host.devices().map_err(RelayError::backend)?;

        Ok(devices
            .enumerate()
            .filter_map(|(index, device)| {
                let name = device.name().ok()?;
                let max_input_channels = device
                    .supported_input_configs()
                    .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                    .unwrap_or(0);
                let max_output_channels = device
                    .supported_output_configs()
                    .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                    .unwrap_or(0);
                let default_sample_rate = device
                    .default_output_config()
                    .or_else(|_| device.default_input_config())
                    .map(|c| c.sample_rate().0)
                    .unwrap_or(0);

                Some(DeviceInfo {
                    id: format!("{}:{index}", self.host_id.name()),
                    name,
                    max_input_channels,
                    max_output_channels,
                    default_sample_rate,
                })
            })
            .collect())
    }

    fn open_input_stream(
        &self,
        device: &DeviceSelection,
        format: AudioFormat,
        chunk_frames: usize,
        on_chunk: InputCallback,
        on_terminate: TerminationCallback,
    ) -> Result<StreamHandle, RelayError> {
        let host_id = self.host_id;
        let selection = device.clone();
        let terminator = Terminator::new(on_terminate);

        run_on_thread("audio-relay-input", move || {
            let host = host(host_id)?;
            let device = find_device(&host, &selection, "input")?;
            tracing::info!(
                device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
                %format,
                chunk_frames,
                "Opening capture stream"
            );
            match format.encoding() {
                SampleEncoding::I8 => {
                    build_input::<i8>(&device, format, chunk_frames, on_chunk, terminator)
                }
                SampleEncoding::I16 => {
                    build_input::<i16>(&device, format, chunk_frames, on_chunk, terminator)
                }
                SampleEncoding::I32 => {
                    build_input::<i32>(&device, format, chunk_frames, on_chunk, terminator)
                }
                SampleEncoding::F32 => {
                    build_input::<f32>(&device, format, chunk_frames, on_chunk, terminator)
                }
                SampleEncoding::F64 => {
                    build_input::<f64>(&device, format, chunk_frames, on_chunk, terminator)
                }
            }
        })
    }

    fn open_output_stream(
        &self,
        device: &DeviceSelection,
        format: AudioFormat,
        on_output: OutputCallback,
        on_terminate: TerminationCallback,
    ) -> Result<StreamHandle, RelayError> {
        let host_id = self.host_id;
        let selection = device.clone();
        let terminator = Terminator::new(on_terminate);

        run_on_thread("audio-relay-output", move || {
            let host = host(host_id)?;
            let device = find_device(&host, &selection, "output")?;
            tracing::info!(
                device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
                %format,
                "Opening playback stream"
            );
            match format.encoding() {
                SampleEncoding::I8 => build_output::<i8>(&device, format, on_output, terminator),
                SampleEncoding::I16 => build_output::<i16>(&device, format, on_output, terminator),
                SampleEncoding::I32 => build_output::<i32>(&device, format, on_output, terminator),
                SampleEncoding::F32 => build_output::<f32>(&device, format, on_output, terminator),
                SampleEncoding::F64 => build_output::<f64>(&device, format, on_output, terminator),
            }
        })
    }
}
