//! Synthetic signal generator for testing without hardware.

use crate::format::{AudioFormat, Samples};
use crate::AudioChunk;

/// What a [`MockSignal`] produces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// All zeros.
    Silence,
    /// A sine tone at `frequency` Hz with peak `amplitude` (unit range).
    Sine {
        /// Tone frequency in Hz.
        frequency: f64,
        /// Peak amplitude in `[0.0, 1.0]`.
        amplitude: f64,
    },
    /// Deterministic white noise with peak `amplitude` (unit range).
    Noise {
        /// Peak amplitude in `[0.0, 1.0]`.
        amplitude: f64,
    },
    /// Every sample equals this raw value in the stream's encoding.
    Constant(f64),
    /// Every sample of the n-th chunk equals `n` (raw), starting at 0.
    ///
    /// Makes delivery order visible in tests.
    Sequence,
}

/// Generates chunks of a synthetic signal in a fixed format.
///
/// # Example
///
/// ```
/// use audio_relay::format::{AudioFormat, SampleEncoding};
/// use audio_relay::source::{MockSignal, Waveform};
///
/// let format = AudioFormat::new(16000, 1, SampleEncoding::I16).unwrap();
/// let mut signal = MockSignal::new(format, Waveform::Sine { frequency: 440.0, amplitude: 0.5 });
///
/// let chunk = signal.next_chunk(1600);
/// assert_eq!(chunk.frame_count(), 1600);
/// ```
#[derive(Debug, Clone)]
pub struct MockSignal {
    format: AudioFormat,
    waveform: Waveform,
    frames_generated: u64,
    chunks_generated: u64,
    seed: u32,
}

impl MockSignal {
    /// Creates a generator for `format`.
    pub fn new(format: AudioFormat, waveform: Waveform) -> Self {
        Self {
            format,
            waveform,
            frames_generated: 0,
            chunks_generated: 0,
            seed: 12345,
        }
    }

    /// The format of generated chunks.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Number of chunks generated so far.
    pub fn chunks_generated(&self) -> u64 {
        self.chunks_generated
    }

    /// Produces the next `frames` frames as a chunk.
    pub fn next_chunk(&mut self, frames: usize) -> AudioChunk {
        let channels = usize::from(self.format.channels());
        let mut work = Vec::with_capacity(frames * channels);
        let sample_rate = f64::from(self.format.sample_rate());

        let raw = matches!(self.waveform, Waveform::Constant(_) | Waveform::Sequence);

        for i in 0..frames {
            let value = match self.waveform {
                Waveform::Silence => 0.0,
                Waveform::Sine {
                    frequency,
                    amplitude,
                } => {
                    let t = (self.frames_generated + i as u64) as f64 / sample_rate;
                    amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin()
                }
                Waveform::Noise { amplitude } => {
                    // Simple LCG for deterministic "random" noise
                    self.seed = self.seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
                    let unit = f64::from((self.seed >> 16) as u16) / 32768.0 - 1.0;
                    amplitude * unit
                }
                Waveform::Constant(v) => v,
                Waveform::Sequence => self.chunks_generated as f64,
            };
            // Same value on every channel
            work.extend(std::iter::repeat(value).take(channels));
        }

        self.frames_generated += frames as u64;
        self.chunks_generated += 1;

        let samples = Samples::from_workspace(self.format.encoding(), &work, !raw);
        AudioChunk::new(samples, self.format.sample_rate(), self.format.channels())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Sample, SampleEncoding};

    fn format(rate: u32, channels: u16, encoding: SampleEncoding) -> AudioFormat {
        AudioFormat::new(rate, channels, encoding).unwrap()
    }

    #[test]
    fn test_silence() {
        let mut signal = MockSignal::new(format(16000, 1, SampleEncoding::I16), Waveform::Silence);
        let chunk = signal.next_chunk(1600);
        let samples = i16::slice(&chunk.samples).unwrap();
        assert_eq!(samples.len(), 1600);
        assert!(samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_sine_has_both_signs() {
        let mut signal = MockSignal::new(
            format(16000, 1, SampleEncoding::I16),
            Waveform::Sine {
                frequency: 440.0,
                amplitude: 1.0,
            },
        );
        let chunk = signal.next_chunk(1600);
        let samples = i16::slice(&chunk.samples).unwrap();
        assert!(samples.iter().any(|&s| s > 0));
        assert!(samples.iter().any(|&s| s < 0));
    }

    #[test]
    fn test_stereo_duplicates_channels() {
        let mut signal = MockSignal::new(
            format(48000, 2, SampleEncoding::F32),
            Waveform::Noise { amplitude: 0.5 },
        );
        let chunk = signal.next_chunk(4800);
        let samples = f32::slice(&chunk.samples).unwrap();
        // 4800 frames * 2 channels
        assert_eq!(samples.len(), 9600);
        assert!(samples.chunks_exact(2).all(|f| f[0] == f[1]));
        assert!(samples.iter().all(|s| s.abs() <= 0.5));
    }

    #[test]
    fn test_sequence_numbers_chunks() {
        let mut signal = MockSignal::new(format(16000, 1, SampleEncoding::I16), Waveform::Sequence);
        for n in 0..3i16 {
            let chunk = signal.next_chunk(10);
            assert!(i16::slice(&chunk.samples).unwrap().iter().all(|&s| s == n));
        }
        assert_eq!(signal.chunks_generated(), 3);
    }

    #[test]
    fn test_constant_is_raw() {
        let mut signal = MockSignal::new(
            format(8000, 1, SampleEncoding::I32),
            Waveform::Constant(1234.0),
        );
        let chunk = signal.next_chunk(5);
        assert_eq!(chunk.samples, Samples::I32(vec![1234; 5]));
    }
}
