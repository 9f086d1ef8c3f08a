//! PCM16 frame encoder/decoder.
//!
//! - Encoder: f32 samples → clamp → ×32767 → i16 LE bytes → base64
//! - Decoder: base64 → i16 LE samples → ÷32767 → f32 chunk at the output rate
//!
//! Both directions are pure and stateless; the only parameter is the sample
//! rate, which ends up in the MIME tag (encoder) or chunk duration (decoder).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::SessionError;

/// Capture rate expected by the remote endpoint.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Rate of synthesized speech returned by the remote endpoint.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
/// Samples per captured frame.
pub const FRAME_SIZE: usize = 4096;

const PCM_SCALE: f32 = 32767.0;

/// One quantized capture frame: mono signed 16-bit samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
}

/// A transmittable frame: base64 text plus its MIME tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBlob {
    pub data: String,
    pub mime_type: String,
}

/// Decoded inbound speech, ready to be scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundAudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl InboundAudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Map one float sample to PCM16. Out-of-range input is clamped.
pub fn float_to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * PCM_SCALE).round() as i16
}

/// Map one PCM16 sample back to [-1.0, 1.0].
pub fn pcm16_to_float(sample: i16) -> f32 {
    // i16::MIN has no encoder counterpart; pin it to -1.0.
    (f32::from(sample) / PCM_SCALE).max(-1.0)
}

#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    sample_rate: u32,
}

impl FrameEncoder {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn mime_type(&self) -> String {
        pcm_mime_type(self.sample_rate)
    }

    pub fn quantize(&self, samples: &[f32]) -> AudioFrame {
        AudioFrame {
            samples: samples.iter().copied().map(float_to_pcm16).collect(),
        }
    }

    pub fn encode_frame(&self, frame: &AudioFrame) -> EncodedBlob {
        let mut bytes = Vec::with_capacity(frame.samples.len() * 2);
        for sample in &frame.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        EncodedBlob {
            data: STANDARD.encode(&bytes),
            mime_type: self.mime_type(),
        }
    }

    /// Quantize and encode in one step.
    pub fn encode(&self, samples: &[f32]) -> EncodedBlob {
        self.encode_frame(&self.quantize(samples))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    sample_rate: u32,
}

impl FrameDecoder {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decode a base64 PCM16 payload into a mono chunk.
    ///
    /// Fails with [`SessionError::Decode`] on invalid base64, an odd byte
    /// count, or an empty payload.
    pub fn decode(&self, data: &str) -> Result<InboundAudioChunk, SessionError> {
        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|e| SessionError::Decode(format!("invalid base64: {}", e)))?;

        if bytes.is_empty() {
            return Err(SessionError::Decode("empty audio payload".to_string()));
        }
        if bytes.len() % 2 != 0 {
            return Err(SessionError::Decode(format!(
                "odd byte count {} for 16-bit PCM",
                bytes.len()
            )));
        }

        let samples = bytes
            .chunks_exact(2)
            .map(|pair| pcm16_to_float(i16::from_le_bytes([pair[0], pair[1]])))
            .collect();

        Ok(InboundAudioChunk::new(samples, self.sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_little_endian_pcm16() {
        let blob = FrameEncoder::new(INPUT_SAMPLE_RATE).encode(&[1.0, -1.0, 0.0]);
        // 0x7fff, 0x8001, 0x0000 little-endian
        assert_eq!(blob.data, "/38BgAAA");
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
    }

    #[test]
    fn clamps_out_of_range_samples() {
        let frame = FrameEncoder::new(INPUT_SAMPLE_RATE).quantize(&[1.5, -3.0, f32::INFINITY]);
        assert_eq!(frame.samples, vec![32767, -32767, 32767]);
    }

    #[test]
    fn round_trip_within_quantization_error() {
        let encoder = FrameEncoder::new(OUTPUT_SAMPLE_RATE);
        let decoder = FrameDecoder::new(OUTPUT_SAMPLE_RATE);

        let input: Vec<f32> = (0..2001).map(|i| -1.0 + i as f32 / 1000.0).collect();
        let chunk = decoder.decode(&encoder.encode(&input).data).unwrap();

        assert_eq!(chunk.len(), input.len());
        for (x, y) in input.iter().zip(&chunk.samples) {
            assert!((x - y).abs() <= 1.0 / 32767.0, "{} vs {}", x, y);
        }
    }

    #[test]
    fn decode_then_encode_is_bit_exact() {
        let samples: Vec<i16> = vec![-32767, -12345, -1, 0, 1, 4242, 32767];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let payload = STANDARD.encode(&bytes);

        let chunk = FrameDecoder::new(OUTPUT_SAMPLE_RATE).decode(&payload).unwrap();
        let reencoded = FrameEncoder::new(OUTPUT_SAMPLE_RATE).encode(&chunk.samples);
        assert_eq!(reencoded.data, payload);
    }

    #[test]
    fn chunk_duration_follows_output_rate() {
        let payload = FrameEncoder::new(OUTPUT_SAMPLE_RATE).encode(&vec![0.0; 12_000]).data;
        let chunk = FrameDecoder::new(OUTPUT_SAMPLE_RATE).decode(&payload).unwrap();
        assert_eq!(chunk.sample_rate, 24_000);
        assert!((chunk.duration() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn malformed_payloads_are_decode_errors() {
        let decoder = FrameDecoder::new(OUTPUT_SAMPLE_RATE);
        assert!(matches!(decoder.decode("%%%not base64%%%"), Err(SessionError::Decode(_))));
        // "AA==" is a single byte
        assert!(matches!(decoder.decode("AA=="), Err(SessionError::Decode(_))));
        assert!(matches!(decoder.decode(""), Err(SessionError::Decode(_))));
    }

    #[test]
    fn most_negative_sample_decodes_to_minus_one() {
        assert_eq!(pcm16_to_float(i16::MIN), -1.0);
        assert_eq!(pcm16_to_float(-32767), -1.0);
    }
}
