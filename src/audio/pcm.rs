//! Sample-format conversion between device `f32` and wire PCM16.
//!
//! The agent speaks little-endian signed 16-bit PCM in both directions:
//!
//! 1. [`encode_pcm16`] / [`decode_pcm16`]: `f32 [-1, 1]` ↔ PCM16 LE bytes.
//! 2. [`RateAdapter`]: interleaved device buffers at the native rate →
//!    mono at the fixed wire rate, streamed across callbacks.
//!
//! Input and output wire rates are fixed independently; nothing here ever
//! converts agent audio into the microphone rate or the other way round.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use super::capture::AudioError;

// ---------------------------------------------------------------------------
// PCM16 encode / decode
// ---------------------------------------------------------------------------

/// Encode `f32` samples as PCM16 little-endian bytes.
///
/// Samples outside `[-1.0, 1.0]` are clamped.
///
/// ```rust
/// use agnes_voice::audio::pcm::encode_pcm16;
///
/// let bytes = encode_pcm16(&[0.0, 1.0, -1.0]);
/// assert_eq!(bytes.len(), 6);
/// assert_eq!(&bytes[0..2], &[0, 0]);
/// assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MAX);
/// ```
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        let v = if clamped < 0.0 {
            (clamped * 32_768.0) as i16
        } else {
            (clamped * 32_767.0) as i16
        };
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode PCM16 little-endian bytes into `f32` samples in `[-1.0, 1.0]`.
///
/// A trailing odd byte (torn sample) is ignored.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| {
            let v = i16::from_le_bytes([pair[0], pair[1]]);
            if v < 0 {
                v as f32 / 32_768.0
            } else {
                v as f32 / 32_767.0
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// RateAdapter
// ---------------------------------------------------------------------------

/// Input frames handed to the resampler per call: 10 ms at the device rate.
fn chunk_frames(source_rate: u32) -> usize {
    (source_rate as usize / 100).max(1)
}

/// Streaming conversion from interleaved device buffers to mono at the
/// wire rate.
///
/// Device callbacks deliver blocks of whatever size the driver picks.  The
/// adapter folds each block to mono and queues it; the resampler consumes
/// the queue in fixed chunks and keeps its interpolation phase between
/// chunks, so the long-run output rate is exactly `target_rate` however the
/// blocks are cut.
///
/// ```rust
/// use agnes_voice::audio::RateAdapter;
///
/// // Same rate: stereo is folded to mono and passed straight through.
/// let mut adapter = RateAdapter::new(16_000, 16_000, 2).unwrap();
/// assert_eq!(adapter.process(&[1.0, 0.0, 0.5, 0.5]), vec![0.5, 0.5]);
/// ```
pub struct RateAdapter {
    channels: usize,
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl RateAdapter {
    pub fn new(source_rate: u32, target_rate: u32, channels: u16) -> Result<Self, AudioError> {
        for rate in [source_rate, target_rate] {
            if rate == 0 {
                return Err(AudioError::UnsupportedRate(rate));
            }
        }

        let resampler = if source_rate == target_rate {
            None
        } else {
            let ratio = target_rate as f64 / source_rate as f64;
            Some(FastFixedIn::new(
                ratio,
                1.0,
                PolynomialDegree::Linear,
                chunk_frames(source_rate),
                1,
            )?)
        };

        Ok(Self {
            channels: channels as usize,
            resampler,
            pending: Vec::new(),
        })
    }

    /// Convert one device block; returns whatever output it completes.
    ///
    /// A trailing partial frame is dropped.  With zero channels nothing is
    /// produced.
    pub fn process(&mut self, interleaved: &[f32]) -> Vec<f32> {
        if self.channels == 0 {
            return Vec::new();
        }
        let channels = self.channels;
        self.pending.extend(
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );

        let Some(resampler) = self.resampler.as_mut() else {
            return std::mem::take(&mut self.pending);
        };

        let mut out = Vec::new();
        let mut consumed = 0;
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() - consumed < needed {
                break;
            }
            let chunk = &self.pending[consumed..consumed + needed];
            match resampler.process(&[chunk], None) {
                Ok(mut waves) => {
                    if let Some(wave) = waves.pop() {
                        out.extend(wave);
                    }
                }
                Err(e) => log::warn!("capture: resampler dropped a chunk: {e}"),
            }
            consumed += needed;
        }
        self.pending.drain(..consumed);
        out
    }

    /// Mono samples queued for the next resampler chunk.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_round_trip_is_close() {
        let input = [0.0_f32, 0.25, -0.25, 0.9, -0.9];
        let out = decode_pcm16(&encode_pcm16(&input));
        assert_eq!(out.len(), input.len());
        for (a, b) in input.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn encode_clamps_out_of_range() {
        let bytes = encode_pcm16(&[2.0, -2.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MIN);
    }

    #[test]
    fn decode_ignores_torn_trailing_byte() {
        let out = decode_pcm16(&[0, 0, 0xFF, 0x7F, 0x01]);
        assert_eq!(out.len(), 2);
        assert!((out[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn equal_rates_fold_channels_only() {
        let mut adapter = RateAdapter::new(16_000, 16_000, 2).unwrap();
        let out = adapter.process(&[1.0, -1.0, 0.5, 0.5, 0.9]);
        assert_eq!(out, vec![0.0, 0.5]);
        assert_eq!(adapter.pending_len(), 0);
    }

    #[test]
    fn zero_channels_produce_nothing() {
        let mut adapter = RateAdapter::new(48_000, 16_000, 0).unwrap();
        assert!(adapter.process(&[1.0, 2.0]).is_empty());
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(matches!(
            RateAdapter::new(0, 16_000, 1),
            Err(AudioError::UnsupportedRate(0))
        ));
    }

    #[test]
    fn odd_sized_blocks_do_not_drift() {
        // 44.1 kHz driver blocks that never line up with 10 ms chunks.
        let mut adapter = RateAdapter::new(44_100, 16_000, 1).unwrap();
        let block = vec![0.0_f32; 509];
        let blocks = 861;

        let produced: usize = (0..blocks).map(|_| adapter.process(&block).len()).sum();

        let consumed = blocks * block.len() - adapter.pending_len();
        let expected = consumed as f64 * 16_000.0 / 44_100.0;
        assert!(
            (produced as f64 - expected).abs() <= 16.0,
            "produced {produced}, expected {expected:.1}"
        );
    }

    #[test]
    fn output_is_continuous_across_blocks() {
        let mut adapter = RateAdapter::new(48_000, 16_000, 1).unwrap();
        let mut out = Vec::new();
        for len in [37, 480, 1, 999, 250, 1_233] {
            out.extend(adapter.process(&vec![0.5_f32; len]));
        }
        assert!(out.len() > 900);
        // Skip the interpolator's warm-up from silence.
        assert!(out[16..].iter().all(|s| (s - 0.5).abs() < 1e-3));
    }
}
