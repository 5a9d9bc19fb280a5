//! Fixed-size microphone frames.
//!
//! Device callbacks deliver buffers of whatever length the hardware likes.
//! [`FrameAssembler`] cuts that stream into [`AudioFrame`]s of exactly
//! `block_size` samples, each tagged with a monotonic sequence number.

use std::sync::Arc;

use super::pcm::encode_pcm16;

// ---------------------------------------------------------------------------
// AudioFrame
// ---------------------------------------------------------------------------

/// One immutable block of mono PCM captured at the fixed input rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Monotonic position of this frame in the capture stream.
    pub seq: u64,
    /// Mono samples in `[-1.0, 1.0]`.
    pub samples: Arc<[f32]>,
    /// Sample rate in Hz (the configured input rate).
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(seq: u64, samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            seq,
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Wire encoding (PCM16 little-endian).
    pub fn to_pcm16(&self) -> Vec<u8> {
        encode_pcm16(&self.samples)
    }
}

// ---------------------------------------------------------------------------
// FrameAssembler
// ---------------------------------------------------------------------------

/// Accumulates arbitrary-length sample runs into fixed-size frames.
///
/// ```rust
/// use agnes_voice::audio::FrameAssembler;
///
/// let mut asm = FrameAssembler::new(4, 16_000);
/// assert!(asm.push(&[0.0; 3]).is_empty());
/// let frames = asm.push(&[0.0; 6]);
/// assert_eq!(frames.len(), 2);
/// assert_eq!(frames[1].seq, 1);
/// ```
pub struct FrameAssembler {
    block_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_seq: u64,
}

impl FrameAssembler {
    /// A zero `block_size` is raised to one.
    pub fn new(block_size: usize, sample_rate: u32) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            sample_rate,
            pending: Vec::with_capacity(block_size),
            next_seq: 0,
        }
    }

    /// Append `samples` and return every frame completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let room = self.block_size - self.pending.len();
            let take = room.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.block_size {
                let block = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_size));
                frames.push(AudioFrame::new(self.next_seq, block, self.sample_rate));
                self.next_seq += 1;
            }
        }

        frames
    }

    /// Discard a partially filled block; sequence numbers keep counting.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

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
    fn frames_have_exact_block_size_and_monotonic_seq() {
        let mut asm = FrameAssembler::new(160, 16_000);
        let mut frames = Vec::new();
        for _ in 0..7 {
            frames.extend(asm.push(&[0.1; 100]));
        }
        // 700 samples → 4 full frames of 160, 60 pending
        assert_eq!(frames.len(), 4);
        assert!(frames.iter().all(|f| f.samples.len() == 160));
        let seqs: Vec<u64> = frames.iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert_eq!(asm.pending_len(), 60);
    }

    #[test]
    fn reset_drops_partial_block_only() {
        let mut asm = FrameAssembler::new(4, 16_000);
        asm.push(&[1.0; 6]);
        asm.reset();
        assert_eq!(asm.pending_len(), 0);
        let frames = asm.push(&[2.0; 4]);
        assert_eq!(frames[0].seq, 1);
        assert!(frames[0].samples.iter().all(|&s| s == 2.0));
    }

    #[test]
    fn zero_block_size_frames_every_sample() {
        let mut asm = FrameAssembler::new(0, 16_000);
        let frames = asm.push(&[0.1, 0.2, 0.3]);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.samples.len() == 1));
    }

    #[test]
    fn frame_duration_and_encoding() {
        let frame = AudioFrame::new(0, vec![0.0; 1_600], 16_000);
        assert!((frame.duration_secs() - 0.1).abs() < 1e-9);
        assert_eq!(frame.to_pcm16().len(), 3_200);
    }

    #[test]
    fn audio_frame_is_send() {
        fn assert_send<T: Send + Sync>() {}
        assert_send::<AudioFrame>();
    }
}
