//! Audio data chunk with format metadata.

use std::time::Duration;

use crate::error::MalformedMessage;
use crate::format::{AudioFormat, SampleEncoding, Samples};

/// A discrete buffer of interleaved audio frames.
///
/// `AudioChunk` is the unit passed from a source to a sink. Ownership moves
/// with every hand-off: a chunk is enqueued once, dequeued once, then dropped.
///
/// # Example
///
/// ```
/// use audio_relay::AudioChunk;
/// use std::time::Duration;
///
/// let chunk = AudioChunk::new(vec![0i16; 1600], 16000, 1);
/// assert_eq!(chunk.duration(), Duration::from_millis(100));
/// assert_eq!(chunk.frame_count(), 1600);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Interleaved samples (`frames × channels`).
    pub samples: Samples,

    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Number of interleaved channels.
    pub channels: u16,
}

impl AudioChunk {
    /// Creates a new chunk from any supported sample vector.
    pub fn new(samples: impl Into<Samples>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
        }
    }

    /// Parses a chunk from little-endian wire bytes in the given format.
    pub fn from_le_bytes(format: AudioFormat, bytes: &[u8]) -> Result<Self, MalformedMessage> {
        let samples = Samples::from_le_bytes(format.encoding(), bytes, format.channels())?;
        Ok(Self::new(samples, format.sample_rate(), format.channels()))
    }

    /// Serializes the samples as little-endian bytes, no header.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.to_le_bytes()
    }

    /// Encoding of the contained samples.
    pub fn encoding(&self) -> SampleEncoding {
        self.samples.encoding()
    }

    /// The chunk's format, or `None` if its rate or channel count is zero.
    pub fn format(&self) -> Option<AudioFormat> {
        AudioFormat::new(self.sample_rate, self.channels, self.encoding()).ok()
    }

    /// Returns the duration of this audio chunk.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }

    /// Number of frames (one sample per channel).
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Returns `true` if this chunk has no complete frame.
    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_mono_16khz() {
        let chunk = AudioChunk::new(vec![0i16; 1600], 16000, 1);
        assert_eq!(chunk.duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_duration_stereo_48khz() {
        let chunk = AudioChunk::new(vec![0.0f32; 9600], 48000, 2);
        // 9600 samples / 2 channels = 4800 frames / 48000 Hz = 100ms
        assert_eq!(chunk.duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_frame_count() {
        let chunk = AudioChunk::new(vec![0i32; 200], 16000, 2);
        assert_eq!(chunk.frame_count(), 100);
    }

    #[test]
    fn test_empty_chunk() {
        let chunk = AudioChunk::new(Vec::<i16>::new(), 16000, 1);
        assert!(chunk.is_empty());
        assert_eq!(chunk.duration(), Duration::ZERO);
    }

    #[test]
    fn test_zero_channels_is_empty() {
        let chunk = AudioChunk::new(vec![0i16; 100], 16000, 0);
        assert!(chunk.is_empty());
        assert!(chunk.format().is_none());
    }

    #[test]
    fn test_format_reflects_samples() {
        let chunk = AudioChunk::new(vec![0i8; 4], 8000, 2);
        let format = chunk.format().unwrap();
        assert_eq!(format.encoding(), SampleEncoding::I8);
        assert_eq!(format.channels(), 2);
        assert_eq!(format.sample_rate(), 8000);
    }

    #[test]
    fn test_wire_bytes() {
        let format = AudioFormat::new(16000, 1, SampleEncoding::I16).unwrap();
        let chunk = AudioChunk::new(vec![1i16, -1], 16000, 1);
        let bytes = chunk.to_le_bytes();
        assert_eq!(bytes.len(), 4);
        assert_eq!(AudioChunk::from_le_bytes(format, &bytes).unwrap(), chunk);
    }
}
