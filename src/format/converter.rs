//! Per-chunk format conversion between two fixed formats.

use tracing::{debug, warn};

use super::convert::{mono_to_stereo, stereo_to_mono};
use super::resample::resample_interleaved;
use super::sample::Samples;
use super::AudioFormat;
use crate::chunk::AudioChunk;

/// How channels are mapped from source to target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelMap {
    Keep,
    Duplicate,
    Average,
    /// No mixing rule for this pair; channels pass through untouched.
    Unsupported,
}

impl ChannelMap {
    fn between(from: u16, to: u16) -> Self {
        match (from, to) {
            (a, b) if a == b => Self::Keep,
            (1, 2) => Self::Duplicate,
            (2, 1) => Self::Average,
            _ => Self::Unsupported,
        }
    }
}

/// Converts chunks from one [`AudioFormat`] to another.
///
/// Derived once per (source, target) pair. Each conversion runs only the
/// steps the pair needs, in a fixed order:
///
/// 1. normalize into an `f64` workspace (scaled to unit range only when the
///    encoding changes)
/// 2. resample with linear interpolation
/// 3. remap channels (1→2 duplicates, 2→1 averages)
/// 4. requantize into the target encoding (saturating)
///
/// # Example
///
/// ```
/// use audio_relay::AudioChunk;
/// use audio_relay::format::{AudioFormat, FormatConverter, SampleEncoding};
///
/// let from = AudioFormat::new(16000, 1, SampleEncoding::I16).unwrap();
/// let to = AudioFormat::new(48000, 2, SampleEncoding::F32).unwrap();
/// let converter = FormatConverter::new(from, to);
///
/// let out = converter.convert(AudioChunk::new(vec![0i16; 480], 16000, 1)).unwrap();
/// assert_eq!(out.frame_count(), 1440);
/// assert_eq!(out.channels, 2);
/// ```
#[derive(Debug, Clone)]
pub struct FormatConverter {
    source: AudioFormat,
    target: AudioFormat,
    channel_map: ChannelMap,
}

impl FormatConverter {
    /// Derives the conversion from `source` to `target`.
    ///
    /// Channel pairs other than equal, 1→2 and 2→1 are unsupported: a
    /// warning is logged here and such chunks keep their source channel count.
    pub fn new(source: AudioFormat, target: AudioFormat) -> Self {
        let channel_map = ChannelMap::between(source.channels(), target.channels());
        if channel_map == ChannelMap::Unsupported {
            warn!(
                from = source.channels(),
                to = target.channels(),
                "Unsupported channel conversion, channels will pass through unchanged"
            );
        }
        Self {
            source,
            target,
            channel_map,
        }
    }

    /// Source format.
    pub fn source(&self) -> AudioFormat {
        self.source
    }

    /// Target format.
    pub fn target(&self) -> AudioFormat {
        self.target
    }

    /// Returns `true` if conversion hands chunks through untouched.
    pub fn is_identity(&self) -> bool {
        self.source == self.target
    }

    /// Returns `false` if the channel pair has no mixing rule.
    pub fn channels_supported(&self) -> bool {
        self.channel_map != ChannelMap::Unsupported
    }

    /// Channel count of converted chunks.
    pub fn output_channels(&self) -> u16 {
        match self.channel_map {
            ChannelMap::Unsupported => self.source.channels(),
            _ => self.target.channels(),
        }
    }

    /// Format of converted chunks.
    ///
    /// Equal to the target unless the channel pair is unsupported.
    pub fn output_format(&self) -> AudioFormat {
        AudioFormat {
            channels: self.output_channels(),
            ..self.target
        }
    }

    /// Converts one chunk.
    ///
    /// Returns `None` if the chunk is empty or conversion leaves no frames.
    /// A chunk that is not in the source format is passed through as is.
    pub fn convert(&self, chunk: AudioChunk) -> Option<AudioChunk> {
        if chunk.is_empty() {
            return None;
        }
        if self.is_identity() {
            return Some(chunk);
        }
        if chunk.format() != Some(self.source) {
            debug!(
                expected = %self.source,
                got_rate = chunk.sample_rate,
                got_channels = chunk.channels,
                got_encoding = %chunk.encoding(),
                "Chunk does not match converter source format, passing through"
            );
            return Some(chunk);
        }

        let rescale = self.source.encoding() != self.target.encoding();
        let in_channels = usize::from(self.source.channels());

        let mut work = chunk.samples.to_workspace(rescale);
        // Drop any trailing partial frame.
        work.truncate(chunk.frame_count() * in_channels);

        if self.source.sample_rate() != self.target.sample_rate() {
            work = resample_interleaved(
                &work,
                in_channels,
                self.source.sample_rate(),
                self.target.sample_rate(),
            );
        }

        work = match self.channel_map {
            ChannelMap::Duplicate => mono_to_stereo(&work),
            ChannelMap::Average => stereo_to_mono(&work),
            ChannelMap::Keep | ChannelMap::Unsupported => work,
        };

        if work.is_empty() {
            return None;
        }

        let samples = Samples::from_workspace(self.target.encoding(), &work, rescale);
        Some(AudioChunk::new(
            samples,
            self.target.sample_rate(),
            self.output_channels(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleEncoding;

    fn fmt(rate: u32, channels: u16, encoding: SampleEncoding) -> AudioFormat {
        AudioFormat::new(rate, channels, encoding).unwrap()
    }

    #[test]
    fn test_identity_is_bit_identical() {
        let f = fmt(48000, 2, SampleEncoding::F32);
        let converter = FormatConverter::new(f, f);
        let chunk = AudioChunk::new(vec![0.1f32, -0.2, f32::MIN_POSITIVE, 1.0], 48000, 2);
        let out = converter.convert(chunk.clone()).unwrap();
        assert_eq!(out, chunk);
        assert!(converter.is_identity());
    }

    #[test]
    fn test_upsample_480_frames() {
        let converter = FormatConverter::new(
            fmt(16000, 1, SampleEncoding::I16),
            fmt(48000, 1, SampleEncoding::I16),
        );
        let out = converter
            .convert(AudioChunk::new(vec![7i16; 480], 16000, 1))
            .unwrap();
        assert_eq!(out.frame_count(), 1440);
        assert_eq!(out.sample_rate, 48000);
    }

    #[test]
    fn test_mono_stereo_mono_roundtrip_is_exact() {
        let mono = fmt(16000, 1, SampleEncoding::I16);
        let stereo = fmt(16000, 2, SampleEncoding::I16);
        let up = FormatConverter::new(mono, stereo);
        let down = FormatConverter::new(stereo, mono);

        let chunk = AudioChunk::new(vec![12345i16; 480], 16000, 1);
        let widened = up.convert(chunk.clone()).unwrap();
        assert_eq!(widened.channels, 2);
        assert_eq!(widened.samples.len(), 960);

        let back = down.convert(widened).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn test_float_to_int_requantize_saturates() {
        let converter = FormatConverter::new(
            fmt(8000, 1, SampleEncoding::F32),
            fmt(8000, 1, SampleEncoding::I16),
        );
        let out = converter
            .convert(AudioChunk::new(vec![0.5f32, 1.5, -1.5, 1.0], 8000, 1))
            .unwrap();
        assert_eq!(out.samples, Samples::I16(vec![16383, i16::MAX, i16::MIN, 32767]));
    }

    #[test]
    fn test_int_to_float_normalizes() {
        let converter = FormatConverter::new(
            fmt(8000, 1, SampleEncoding::I16),
            fmt(8000, 1, SampleEncoding::F64),
        );
        let out = converter
            .convert(AudioChunk::new(vec![-32768i16, 16384], 8000, 1))
            .unwrap();
        assert_eq!(out.samples, Samples::F64(vec![-1.0, 0.5]));
    }

    #[test]
    fn test_int_width_change() {
        let converter = FormatConverter::new(
            fmt(8000, 1, SampleEncoding::I8),
            fmt(8000, 1, SampleEncoding::I16),
        );
        let out = converter
            .convert(AudioChunk::new(vec![64i8, 0], 8000, 1))
            .unwrap();
        // 64 / 128 = 0.5, 0.5 * 32767 truncates to 16383
        assert_eq!(out.samples, Samples::I16(vec![16383, 0]));
    }

    #[test]
    fn test_stereo_downmix_with_resample() {
        let converter = FormatConverter::new(
            fmt(48000, 2, SampleEncoding::F32),
            fmt(16000, 1, SampleEncoding::I16),
        );
        let out = converter
            .convert(AudioChunk::new(vec![0.0f32; 960], 48000, 2))
            .unwrap();
        assert_eq!(out.channels, 1);
        assert_eq!(out.frame_count(), 160);
        assert_eq!(out.encoding(), SampleEncoding::I16);
    }

    #[test]
    fn test_unsupported_channels_pass_through() {
        let converter = FormatConverter::new(
            fmt(48000, 6, SampleEncoding::I16),
            fmt(48000, 2, SampleEncoding::F32),
        );
        assert!(!converter.channels_supported());
        assert_eq!(converter.output_channels(), 6);
        assert_eq!(
            converter.output_format(),
            fmt(48000, 6, SampleEncoding::F32)
        );

        let out = converter
            .convert(AudioChunk::new(vec![0i16; 60], 48000, 6))
            .unwrap();
        assert_eq!(out.channels, 6);
        assert_eq!(out.frame_count(), 10);
        assert_eq!(out.encoding(), SampleEncoding::F32);
    }

    #[test]
    fn test_empty_chunk_is_dropped() {
        let f = fmt(16000, 1, SampleEncoding::I16);
        let converter = FormatConverter::new(f, f);
        assert!(converter
            .convert(AudioChunk::new(Vec::<i16>::new(), 16000, 1))
            .is_none());
    }

    #[test]
    fn test_zero_length_result_is_dropped() {
        let converter = FormatConverter::new(
            fmt(48000, 1, SampleEncoding::F32),
            fmt(8000, 1, SampleEncoding::F32),
        );
        assert!(converter
            .convert(AudioChunk::new(vec![0.25f32], 48000, 1))
            .is_none());
    }

    #[test]
    fn test_mismatched_chunk_passes_through() {
        let converter = FormatConverter::new(
            fmt(16000, 1, SampleEncoding::I16),
            fmt(48000, 1, SampleEncoding::I16),
        );
        let chunk = AudioChunk::new(vec![1.0f32; 10], 16000, 1);
        assert_eq!(converter.convert(chunk.clone()), Some(chunk));
    }
}
