//! Sample-level and channel conversion helpers.

use super::sample::Sample;

/// Converts an f32 sample to i16.
///
/// Uses × 32767 for symmetric scaling. Out-of-range input saturates.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    i16::from_unit(f64::from(sample))
}

/// Converts an i16 sample to f32 in `[-1.0, 1.0)`.
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample.to_unit() as f32
}

/// Converts interleaved stereo to mono by averaging each pair.
///
/// A trailing unpaired sample is ignored. Integer averages round to nearest.
pub fn stereo_to_mono<T: Sample>(stereo: &[T]) -> Vec<T> {
    stereo
        .chunks_exact(2)
        .map(|pair| {
            let sum = pair[0].to_workspace() + pair[1].to_workspace();
            T::from_workspace(sum / 2.0)
        })
        .collect()
}

/// Converts mono to interleaved stereo by duplicating each sample.
pub fn mono_to_stereo<T: Sample>(mono: &[T]) -> Vec<T> {
    mono.iter().flat_map(|&s| [s, s]).collect()
}

/// Scales samples in place.
///
/// Integers saturate at their range limits; floats clip to `[-1.0, 1.0]`.
pub fn apply_gain<T: Sample>(samples: &mut [T], gain: f64) {
    for s in samples.iter_mut() {
        let mut scaled = s.to_workspace() * gain;
        if T::ENCODING.is_float() {
            scaled = scaled.clamp(-1.0, 1.0);
        }
        *s = T::from_workspace(scaled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_full_range() {
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(-1.0), -32767);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_f32_to_i16_saturates() {
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32768);
    }

    #[test]
    fn test_i16_to_f32_full_range() {
        let max = i16_to_f32(32767);
        assert!((max - 0.99997).abs() < 0.001);
        assert_eq!(i16_to_f32(-32768), -1.0);
        assert_eq!(i16_to_f32(0), 0.0);
    }

    #[test]
    fn test_roundtrip_within_one_lsb() {
        for &original in &[0i16, 1000, -1000, 32767, -32768] {
            let back = f32_to_i16(i16_to_f32(original));
            assert!((i32::from(original) - i32::from(back)).abs() <= 1);
        }
    }

    #[test]
    fn test_stereo_to_mono() {
        let mono = stereo_to_mono(&[100i16, 200, 300, 400]);
        assert_eq!(mono, vec![150, 350]);
    }

    #[test]
    fn test_stereo_to_mono_cancellation() {
        assert_eq!(stereo_to_mono(&[1000i16, -1000]), vec![0]);
    }

    #[test]
    fn test_stereo_to_mono_no_overflow() {
        assert_eq!(stereo_to_mono(&[i16::MAX, i16::MAX]), vec![i16::MAX]);
    }

    #[test]
    fn test_mono_to_stereo() {
        assert_eq!(mono_to_stereo(&[100i16, 200]), vec![100, 100, 200, 200]);
    }

    #[test]
    fn test_apply_gain_clips_int() {
        let mut samples = vec![20000i16, -20000, 100];
        apply_gain(&mut samples, 2.0);
        assert_eq!(samples, vec![i16::MAX, i16::MIN, 200]);
    }

    #[test]
    fn test_apply_gain_clips_float() {
        let mut samples = vec![0.75f32, -0.25];
        apply_gain(&mut samples, 2.0);
        assert_eq!(samples, vec![1.0, -0.5]);
    }
}
