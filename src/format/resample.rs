//! Sample rate conversion.
//!
//! Linear interpolation per channel. Fast, and adequate for speech and
//! monitoring; not a band-limited resampler.

use super::sample::Sample;

/// Number of output frames for `frames` input frames, rounded half-up.
pub(crate) fn output_frames(frames: usize, from_rate: u32, to_rate: u32) -> usize {
    let num = 2 * frames as u128 * u128::from(to_rate) + u128::from(from_rate);
    let den = 2 * u128::from(from_rate);
    (num / den) as usize
}

/// Resamples mono audio from one sample rate to another.
///
/// # Example
///
/// ```
/// use audio_relay::format::resample;
///
/// let out = resample(&[0i16, 1000, 2000, 3000], 16000, 48000);
/// assert_eq!(out.len(), 12);
/// ```
pub fn resample<T: Sample>(samples: &[T], from_rate: u32, to_rate: u32) -> Vec<T> {
    resample_interleaved(samples, 1, from_rate, to_rate)
}

/// Resamples interleaved audio, interpolating each channel independently.
///
/// A trailing partial frame is ignored. Returns the input unchanged if the
/// rates match or either rate is zero.
pub fn resample_interleaved<T: Sample>(
    samples: &[T],
    channels: usize,
    from_rate: u32,
    to_rate: u32,
) -> Vec<T> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || channels == 0 {
        return samples.to_vec();
    }

    let frames = samples.len() / channels;
    if frames == 0 {
        return Vec::new();
    }

    let out_frames = output_frames(frames, from_rate, to_rate);
    let step = f64::from(from_rate) / f64::from(to_rate);
    let mut output = Vec::with_capacity(out_frames * channels);

    for i in 0..out_frames {
        let src_pos = i as f64 * step;
        let src_idx = src_pos.floor() as usize;
        let frac = src_pos - src_idx as f64;

        for ch in 0..channels {
            let sample = if src_idx + 1 < frames {
                let s1 = samples[src_idx * channels + ch].to_workspace();
                let s2 = samples[(src_idx + 1) * channels + ch].to_workspace();
                T::from_workspace(s1 + (s2 - s1) * frac)
            } else {
                // Past the last interpolation point: hold the final frame.
                samples[(frames - 1) * channels + ch]
            };
            output.push(sample);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_same_rate() {
        let samples = vec![100i16, 200, 300];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn test_resample_empty() {
        let samples: Vec<i16> = vec![];
        assert!(resample(&samples, 16000, 8000).is_empty());
    }

    #[test]
    fn test_resample_downsample() {
        // 48kHz to 16kHz = 3:1 ratio
        let samples: Vec<i16> = (0..480).map(|i| (i * 10) as i16).collect();
        assert_eq!(resample(&samples, 48000, 16000).len(), 160);
    }

    #[test]
    fn test_resample_480_frames_16k_to_48k() {
        let samples = vec![0.0f64; 480];
        assert_eq!(resample(&samples, 16000, 48000).len(), 1440);
    }

    #[test]
    fn test_output_frames_rounds_half_up() {
        // 3 frames * 1 / 2 = 1.5 -> 2
        assert_eq!(output_frames(3, 2, 1), 2);
        // 1 frame * 1 / 3 = 0.33 -> 0
        assert_eq!(output_frames(1, 3, 1), 0);
        // 44100 -> 48000 for 441 frames is exactly 480
        assert_eq!(output_frames(441, 44100, 48000), 480);
    }

    #[test]
    fn test_resample_interpolates() {
        let out = resample(&[0i16, 300], 1, 3);
        assert_eq!(out, vec![0, 100, 200, 300, 300, 300]);
    }

    #[test]
    fn test_resample_stereo_keeps_channels_apart() {
        // Left ramps up, right is constant
        let samples = vec![0i16, 500, 300, 500];
        let out = resample_interleaved(&samples, 2, 1, 3);
        assert_eq!(out.len(), 12);
        let right: Vec<i16> = out.iter().skip(1).step_by(2).copied().collect();
        assert!(right.iter().all(|&s| s == 500));
        let left: Vec<i16> = out.iter().step_by(2).copied().collect();
        assert_eq!(&left[..4], &[0, 100, 200, 300]);
    }

    #[test]
    fn test_resample_single_frame_downsample_to_nothing() {
        assert!(resample(&[1.0f32], 48000, 8000).is_empty());
    }
}
