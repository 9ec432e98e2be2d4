//! Audio formats and conversion.
//!
//! - [`AudioFormat`]: the `(rate, channels, encoding)` triple a stream is fixed to
//! - [`Samples`]: owned interleaved samples in one encoding
//! - [`FormatConverter`]: normalize, resample, remap channels, requantize

mod convert;
mod converter;
mod resample;
mod sample;

use std::fmt;

use crate::error::RelayError;

pub use convert::{apply_gain, f32_to_i16, i16_to_f32, mono_to_stereo, stereo_to_mono};
pub use converter::FormatConverter;
pub use resample::{resample, resample_interleaved};
pub use sample::{Sample, SampleEncoding, Samples, SamplesMut};

/// The format of a stream. Immutable once chosen.
///
/// # Example
///
/// ```
/// use audio_relay::format::{AudioFormat, SampleEncoding};
///
/// let format = AudioFormat::new(16000, 1, SampleEncoding::I16).unwrap();
/// assert_eq!(format.frame_bytes(), 2);
/// assert!(AudioFormat::new(0, 1, SampleEncoding::I16).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    sample_rate: u32,
    channels: u16,
    encoding: SampleEncoding,
}

impl AudioFormat {
    /// Creates a format, rejecting a zero sample rate or channel count.
    pub fn new(
        sample_rate: u32,
        channels: u16,
        encoding: SampleEncoding,
    ) -> Result<Self, RelayError> {
        if sample_rate == 0 {
            return Err(RelayError::format_unsupported("sample rate must be positive"));
        }
        if channels == 0 {
            return Err(RelayError::format_unsupported("channel count must be positive"));
        }
        Ok(Self {
            sample_rate,
            channels,
            encoding,
        })
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of interleaved channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Sample encoding.
    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    /// Bytes in one frame.
    pub fn frame_bytes(&self) -> usize {
        self.encoding.bytes_per_sample() * self.channels as usize
    }

    /// Bytes in a chunk of `frames` frames.
    pub fn chunk_bytes(&self, frames: usize) -> usize {
        self.frame_bytes() * frames
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}",
            self.sample_rate, self.channels, self.encoding
        )
    }
}
