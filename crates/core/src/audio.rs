//! PCM16 conversion, base64 wrapping and capture framing.
//!
//! The remote model fixes both sample rates: microphone audio travels upstream
//! as 16 kHz mono PCM16, and model speech arrives as 24 kHz mono PCM16. Audio
//! captured at any other device rate goes through [`CaptureResampler`] first.

use crate::error::AudioError;
use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Sample rate of outbound microphone audio.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of inbound model speech.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;
/// Samples per outbound capture frame (256 ms at 16 kHz).
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;
/// Mime type attached to every outbound audio frame.
pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";

const RESAMPLER_CHUNK_SIZE: usize = 512;

/// A decoded block of mono audio ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Converts floating-point samples to PCM16, clamping out-of-range values.
pub fn f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts PCM16 samples to floating point in `[-1.0, 1.0)`.
pub fn i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// Encodes floating-point samples as base64 little-endian PCM16.
pub fn encode_pcm16_base64(pcm32: &[f32]) -> String {
    let bytes: Vec<u8> = f32_to_i16(pcm32)
        .into_iter()
        .flat_map(i16::to_le_bytes)
        .collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decodes a base64 little-endian PCM16 payload.
pub fn decode_pcm16_base64(base64_fragment: &str) -> Result<Vec<i16>, AudioError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(base64_fragment)?;
    pcm16_from_le_bytes(&bytes)
}

/// Interprets raw little-endian bytes as PCM16 samples.
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Result<Vec<i16>, AudioError> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

/// Decodes an inbound model chunk into a playable 24 kHz buffer.
pub fn decode_playback_chunk(base64_fragment: &str) -> Result<PcmBuffer, AudioError> {
    let pcm16 = decode_pcm16_base64(base64_fragment)?;
    Ok(PcmBuffer::new(i16_to_f32(&pcm16), PLAYBACK_SAMPLE_RATE))
}

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> Result<FastFixedIn<f32>, AudioError> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Converts a capture stream at an arbitrary device rate to 16 kHz.
///
/// The resampler consumes fixed-size chunks, so partial input is held until
/// enough samples have arrived.
pub struct CaptureResampler {
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl CaptureResampler {
    pub fn new(device_rate: u32) -> Result<Self, AudioError> {
        let inner = if device_rate == CAPTURE_SAMPLE_RATE {
            None
        } else {
            Some(create_resampler(
                device_rate as f64,
                CAPTURE_SAMPLE_RATE as f64,
                RESAMPLER_CHUNK_SIZE,
            )?)
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, AudioError> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };
        self.pending.extend_from_slice(samples);

        let mut resampled = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let output = resampler.process(&[chunk], None)?;
            resampled.extend_from_slice(&output[0]);
        }
        Ok(resampled)
    }
}

/// Accumulates arbitrary-length sample slices into fixed capture frames.
#[derive(Debug)]
pub struct CaptureFramer {
    frame_size: usize,
    pending: Vec<f32>,
}

impl Default for CaptureFramer {
    fn default() -> Self {
        Self::new(CAPTURE_FRAME_SAMPLES)
    }
}

impl CaptureFramer {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size: frame_size.max(1),
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Appends samples and returns every frame completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }

    /// Samples still waiting for a full frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_f32_to_i16() {
        let input = vec![0.5f32, -1.0f32, 0.0f32];
        let result = f32_to_i16(&input);
        assert_eq!(result, vec![16384, i16::MIN, 0]);

        // 1.0 would overflow to 32768 without clamping.
        let result = f32_to_i16(&[1.0, 2.0, -2.0, f32::NAN]);
        assert_eq!(result, vec![i16::MAX, i16::MAX, i16::MIN, 0]);

        assert!(f32_to_i16(&[]).is_empty());
    }

    #[test]
    fn test_i16_to_f32() {
        let input = vec![i16::MIN, 0i16, 16384i16];
        let result = i16_to_f32(&input);

        assert_eq!(result.len(), 3);
        assert_abs_diff_eq!(result[0], -1.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[1], 0.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[2], 0.5, epsilon = 0.0001);
    }

    #[test]
    fn test_encode_pcm16_is_little_endian() {
        let encoded = encode_pcm16_base64(&[0.5]);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(bytes, vec![0x00, 0x40]);
    }

    #[test]
    fn test_decode_pcm16_base64() {
        let bytes = vec![0x00u8, 0x40u8, 0x00u8, 0x80u8];
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        assert_eq!(decode_pcm16_base64(&encoded).unwrap(), vec![16384, -32768]);

        assert!(decode_pcm16_base64("").unwrap().is_empty());

        let err = decode_pcm16_base64("invalid_base64!").unwrap_err();
        assert!(matches!(err, AudioError::Base64(_)));

        let odd = base64::engine::general_purpose::STANDARD.encode([0x00u8]);
        let err = decode_pcm16_base64(&odd).unwrap_err();
        assert!(matches!(err, AudioError::OddLength(1)));
    }

    #[test]
    fn test_decode_playback_chunk_duration() {
        // 2400 samples at 24 kHz is 100 ms.
        let encoded = encode_pcm16_base64(&vec![0.25f32; 2400]);
        let buffer = decode_playback_chunk(&encoded).unwrap();
        assert_eq!(buffer.sample_rate, PLAYBACK_SAMPLE_RATE);
        assert_eq!(buffer.samples.len(), 2400);
        assert_abs_diff_eq!(buffer.duration(), 0.1, epsilon = 1e-9);
        assert_abs_diff_eq!(buffer.samples[0], 0.25, epsilon = 0.0001);
    }

    #[test]
    fn test_create_resampler() {
        assert!(create_resampler(48000.0, 16000.0, 512).is_ok());
        assert!(create_resampler(16000.0, 16000.0, 512).is_ok());
        assert!(create_resampler(44100.0, 16000.0, 1024).is_ok());
    }

    #[test]
    fn test_capture_resampler_passthrough_at_capture_rate() {
        let mut resampler = CaptureResampler::new(CAPTURE_SAMPLE_RATE).unwrap();
        let input = vec![0.1f32, 0.2, 0.3];
        assert_eq!(resampler.process(&input).unwrap(), input);
    }

    #[test]
    fn test_capture_resampler_downsamples_48k() {
        let mut resampler = CaptureResampler::new(48_000).unwrap();
        let mut produced = 0;
        // One second of audio delivered in uneven browser-sized slices.
        for _ in 0..(48_000 / 480) {
            produced += resampler.process(&[0.0f32; 480]).unwrap().len();
        }
        assert!(
            (15_000..=17_000).contains(&produced),
            "expected roughly 16000 samples, got {produced}"
        );
    }

    #[test]
    fn test_capture_framer_emits_fixed_blocks() {
        let mut framer = CaptureFramer::new(4);
        assert!(framer.push(&[1.0, 2.0, 3.0]).is_empty());
        assert_eq!(framer.buffered(), 3);

        let frames = framer.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(
            frames,
            vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]
        );
        assert_eq!(framer.buffered(), 1);
    }

    #[test]
    fn test_default_framer_uses_capture_frame_size() {
        let mut framer = CaptureFramer::default();
        let frames = framer.push(&vec![0.0; CAPTURE_FRAME_SAMPLES * 2 + 10]);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == CAPTURE_FRAME_SAMPLES));
        assert_eq!(framer.buffered(), 10);
    }
}
