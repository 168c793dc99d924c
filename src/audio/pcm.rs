//! 16-bit PCM framing for the wire: float samples out, base64 text in.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;

use crate::error::{LiveError, Result};

/// A captured frame ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Base64 of little-endian i16 samples.
    pub data: String,
    pub mime_type: String,
}

/// A decoded buffer the output device can schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub sample_rate: u32,
    /// One vector per channel, all the same length.
    pub channels: Vec<Vec<f32>>,
}

impl PlaybackBuffer {
    #[must_use]
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Playback length in seconds.
    #[must_use]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}

#[must_use]
pub fn mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Convert one float sample to i16, clamping out-of-range input.
#[must_use]
pub fn to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * f32::from(i16::MAX)).round() as i16
}

/// Encode float samples as a base64 PCM16 frame tagged with `sample_rate`.
#[must_use]
pub fn encode(samples: &[f32], sample_rate: u32) -> EncodedFrame {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&to_i16(sample).to_le_bytes());
    }

    EncodedFrame {
        data: BASE64_STANDARD.encode(&bytes),
        mime_type: mime_type(sample_rate),
    }
}

/// Base64 text to raw bytes.
pub fn decode(data: &str) -> Result<Vec<u8>> {
    BASE64_STANDARD
        .decode(data.trim())
        .map_err(|e| LiveError::Decode(format!("invalid base64 payload: {e}")))
}

/// Reinterpret raw i16 LE bytes as a de-interleaved float buffer.
pub fn decode_audio_data(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: usize,
) -> Result<PlaybackBuffer> {
    if channel_count == 0 {
        return Err(LiveError::Decode("channel count must be at least 1".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(LiveError::Decode(format!(
            "odd PCM16 payload length: {} bytes",
            bytes.len()
        )));
    }

    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    if samples.len() % channel_count != 0 {
        return Err(LiveError::Decode(format!(
            "{} samples do not divide into {channel_count} channels",
            samples.len()
        )));
    }

    let frame_count = samples.len() / channel_count;
    let mut channels = vec![Vec::with_capacity(frame_count); channel_count];
    for i in 0..frame_count {
        for (c, channel) in channels.iter_mut().enumerate() {
            channel.push(f32::from(samples[i * channel_count + c]) / 32768.0);
        }
    }

    Ok(PlaybackBuffer {
        sample_rate,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(samples: &[f32]) -> Vec<f32> {
        let frame = encode(samples, 16000);
        let bytes = decode(&frame.data).unwrap_or_else(|e| panic!("{e}"));
        let buffer = decode_audio_data(&bytes, 16000, 1).unwrap_or_else(|e| panic!("{e}"));
        buffer.channels[0].clone()
    }

    #[test]
    fn round_trip_within_quantization_error() {
        let samples: Vec<f32> = (0..=200).map(|i| (i as f32 / 100.0) - 1.0).collect();
        let decoded = round_trip(&samples);
        assert_eq!(decoded.len(), samples.len());
        // Rounding contributes half a step; the 32767/32768 gain mismatch at
        // most one more step at full scale.
        let tolerance = 1.5 / 32768.0;
        for (orig, got) in samples.iter().zip(&decoded) {
            assert!(
                (orig - got).abs() <= tolerance,
                "sample {orig} decoded as {got}"
            );
        }
    }

    #[test]
    fn out_of_range_is_clamped() {
        assert_eq!(to_i16(1.5), i16::MAX);
        assert_eq!(to_i16(-3.0), -i16::MAX);
        assert_eq!(to_i16(0.0), 0);
    }

    #[test]
    fn rounds_to_nearest() {
        assert_eq!(to_i16(0.6 / 32767.0), 1);
        assert_eq!(to_i16(0.4 / 32767.0), 0);
        assert_eq!(to_i16(-0.6 / 32767.0), -1);
    }

    #[test]
    fn encoded_bytes_are_little_endian() {
        let frame = encode(&[1.0, -1.0], 16000);
        let bytes = decode(&frame.data).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(bytes, vec![0xFF, 0x7F, 0x01, 0x80]);
    }

    #[test]
    fn mime_type_carries_rate() {
        let frame = encode(&[0.0; 4], 16000);
        assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
    }

    #[test]
    fn deinterleaves_channels() {
        let samples: [i16; 6] = [100, -100, 200, -200, 300, -300];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let buffer = decode_audio_data(&bytes, 24000, 2).unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frames(), 3);
        assert_eq!(buffer.channels[0][2], 300.0 / 32768.0);
        assert_eq!(buffer.channels[1][0], -100.0 / 32768.0);
    }

    #[test]
    fn duration_follows_sample_rate() {
        let bytes = vec![0u8; 24000 * 2];
        let buffer = decode_audio_data(&bytes, 24000, 1).unwrap_or_else(|e| panic!("{e}"));
        assert!((buffer.duration() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn odd_byte_count_is_rejected() {
        let result = decode_audio_data(&[0, 0, 0], 24000, 1);
        assert!(matches!(result, Err(LiveError::Decode(_))));
    }

    #[test]
    fn partial_frame_is_rejected() {
        let result = decode_audio_data(&[0, 0, 0, 0, 0, 0], 24000, 2);
        assert!(matches!(result, Err(LiveError::Decode(_))));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        assert!(matches!(decode("not base64!"), Err(LiveError::Decode(_))));
    }
}
