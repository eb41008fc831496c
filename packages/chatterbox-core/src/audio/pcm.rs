//! Sample format conversion between interleaved 16-bit PCM and normalized floats.
//!
//! The device wire format is little-endian signed 16-bit; everything inside
//! the pipeline is normalized f32. Scaling is symmetric by `i16::MAX` so the
//! values representable on both sides round-trip exactly (0.0 -> 0 -> 0.0,
//! 1.0 -> 32767 -> 1.0).

const SCALE: f32 = i16::MAX as f32;

/// Converts one normalized float sample to a 16-bit PCM sample, clamping
/// to [-1.0, 1.0].
#[inline]
#[must_use]
pub fn f32_to_i16_sample(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * SCALE).round() as i16
}

/// Converts one 16-bit PCM sample to a normalized float.
#[inline]
#[must_use]
pub fn i16_to_f32_sample(sample: i16) -> f32 {
    f32::from(sample) / SCALE
}

/// Converts a slice of 16-bit PCM samples to normalized floats.
#[must_use]
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| i16_to_f32_sample(s)).collect()
}

/// Converts a slice of normalized floats to 16-bit PCM samples.
#[must_use]
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| f32_to_i16_sample(s)).collect()
}

/// Decodes little-endian 16-bit PCM bytes to normalized floats.
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16_to_f32_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// Encodes normalized floats as little-endian 16-bit PCM bytes.
#[must_use]
pub fn f32_to_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&f32_to_i16_sample(sample).to_le_bytes());
    }
    out
}

/// Mixes interleaved multi-channel samples down to mono by averaging.
///
/// `channels` of 0 or 1 returns the input unchanged.
#[must_use]
pub fn mix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_full_scale_round_trip_exactly() {
        assert_eq!(f32_to_i16_sample(0.0), 0);
        assert_eq!(i16_to_f32_sample(0), 0.0);
        assert_eq!(f32_to_i16_sample(1.0), i16::MAX);
        assert_eq!(i16_to_f32_sample(i16::MAX), 1.0);
        assert_eq!(f32_to_i16_sample(-1.0), -i16::MAX);
    }

    #[test]
    fn byte_round_trip_preserves_representable_values() {
        let original = vec![0.0f32, 1.0, -1.0, i16_to_f32_sample(1234)];
        let bytes = f32_to_bytes(&original);
        assert_eq!(bytes.len(), original.len() * 2);
        assert_eq!(bytes_to_f32(&bytes), original);
    }

    #[test]
    fn out_of_range_input_is_clamped() {
        assert_eq!(f32_to_i16_sample(2.0), i16::MAX);
        assert_eq!(f32_to_i16_sample(-2.0), -i16::MAX);
    }

    #[test]
    fn trailing_odd_byte_is_ignored() {
        let bytes = [0x00, 0x00, 0x7f];
        assert_eq!(bytes_to_f32(&bytes), vec![0.0]);
    }

    #[test]
    fn stereo_mixdown_averages_channels() {
        let interleaved = [0.5f32, -0.5, 1.0, 0.0];
        assert_eq!(mix_to_mono(&interleaved, 2), vec![0.0, 0.5]);
    }

    #[test]
    fn mono_mixdown_is_identity() {
        let samples = [0.1f32, 0.2, 0.3];
        assert_eq!(mix_to_mono(&samples, 1), samples.to_vec());
    }
}
