//! Conversions between base64 text, raw PCM16 byte buffers, and normalized
//! floating point audio.

use base64::{Engine as _, engine::general_purpose};

/// Decode base64 text into raw bytes.
///
/// The service is trusted to send valid base64; callers decide what to do
/// with a frame that isn't.
pub fn decode(base64: &str) -> Result<Vec<u8>, base64::DecodeError> {
    general_purpose::STANDARD.decode(base64)
}

/// Encode raw bytes as base64 text. Exact inverse of [`decode`].
pub fn encode(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

/// A decoded chunk of audio: one plane of normalized samples per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Number of frames, where a frame holds one sample per channel.
    pub fn frame_count(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Consume the buffer and return its first channel.
    pub fn into_mono(mut self) -> Vec<f32> {
        if self.channels.is_empty() {
            Vec::new()
        } else {
            self.channels.swap_remove(0)
        }
    }
}

/// Interpret a byte buffer as signed little-endian 16-bit interleaved samples
/// and de-interleave it into per-channel planes of samples normalized to
/// [-1.0, 1.0].
///
/// A trailing partial frame is truncated.
pub fn pcm16_to_float(bytes: &[u8], sample_rate: u32, channel_count: usize) -> AudioBuffer {
    if channel_count == 0 {
        return AudioBuffer {
            sample_rate,
            channels: Vec::new(),
        };
    }

    let frame_bytes = 2 * channel_count;
    let frame_count = bytes.len() / frame_bytes;
    let mut channels = vec![Vec::with_capacity(frame_count); channel_count];

    for frame in bytes.chunks_exact(frame_bytes) {
        for (channel, sample) in channels.iter_mut().zip(frame.chunks_exact(2)) {
            let sample = i16::from_le_bytes([sample[0], sample[1]]);
            channel.push(sample as f32 / 32768.0);
        }
    }

    AudioBuffer {
        sample_rate,
        channels,
    }
}

/// Scale normalized samples back into little-endian PCM16 bytes.
///
/// Out-of-range input wraps rather than clamps.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);

    for &sample in samples {
        let sample = (sample * 32768.0) as i32 as i16;
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    bytes
}

/// Nearest-sample resampler for when a device cannot open at the protocol
/// rates. Good enough for speech; not meant for music.
pub fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;
    let mut resampled = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = (i as f64 / ratio) as usize;
        if src_idx < samples.len() {
            resampled.push(samples[src_idx]);
        }
    }

    resampled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_round_trip() {
        let all_bytes: Vec<u8> = (0..=255).collect();

        for bytes in [&[][..], &[0][..], &all_bytes[..]] {
            assert_eq!(decode(&encode(bytes)).unwrap(), bytes);
        }
    }

    #[test]
    fn test_pcm16_round_trip() {
        let samples: Vec<i16> = vec![0, 1, -1, 12345, -12345, i16::MAX, i16::MIN];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        let buffer = pcm16_to_float(&bytes, 24_000, 1);
        assert_eq!(buffer.frame_count(), samples.len());

        let back = float_to_pcm16(buffer.channel(0));
        assert_eq!(back, bytes);
    }

    #[test]
    fn test_float_to_pcm16_wraps_out_of_range() {
        // 1.5 * 32768 = 49152, which wraps to -16384 in 16 bits.
        assert_eq!(float_to_pcm16(&[1.5]), float_to_pcm16(&[-0.5]));
    }

    #[test]
    fn test_pcm16_to_float_truncates_partial_frames() {
        // Stereo: 2 full frames plus a dangling half frame and an odd byte.
        let bytes: Vec<u8> = [100i16, -100, 200, -200, 300]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .chain([0xFF])
            .collect();

        let buffer = pcm16_to_float(&bytes, 16_000, 2);
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frame_count(), 2);
        assert_eq!(buffer.channel(0), &[100.0 / 32768.0, 200.0 / 32768.0]);
        assert_eq!(buffer.channel(1), &[-100.0 / 32768.0, -200.0 / 32768.0]);
    }

    #[test]
    fn test_duration() {
        let bytes = vec![0u8; 24_000 * 2];
        let buffer = pcm16_to_float(&bytes, 24_000, 1);
        assert_eq!(buffer.duration_seconds(), 1.0);
    }

    #[test]
    fn test_resample_identity_and_length() {
        let samples: Vec<f32> = (0..160).map(|i| i as f32).collect();

        assert_eq!(resample_linear(&samples, 16_000, 16_000), samples);
        assert_eq!(resample_linear(&samples, 16_000, 48_000).len(), 480);
        assert_eq!(resample_linear(&samples, 48_000, 16_000).len(), 53);
    }
}
