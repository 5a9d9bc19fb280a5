//! Gap-free scheduling of streamed agent audio.
//!
//! # Scheduling rule
//!
//! ```text
//! scheduled_start = max(output_clock_now, next_cursor)
//! next_cursor     = scheduled_start + duration
//! ```
//!
//! Chunks therefore play strictly in enqueue order, back-to-back while they
//! arrive faster than they are consumed, and never overlap.  The only thing
//! that moves the cursor backwards is [`PlaybackScheduler::stop_all`], which
//! resets it to "now" after an interruption.
//!
//! The scheduler is the single writer of the cursor.  It talks to hardware
//! through [`PlaybackDevice`], which owns the output clock.

use std::collections::VecDeque;
use std::sync::Arc;

use super::capture::AudioError;
use super::pcm::decode_pcm16;

// ---------------------------------------------------------------------------
// PlaybackChunk
// ---------------------------------------------------------------------------

/// Identifier of a scheduled chunk.
pub type ChunkId = u64;

/// A decoded agent-audio buffer with its place on the output timeline.
#[derive(Debug, Clone)]
pub struct PlaybackChunk {
    pub id: ChunkId,
    /// Mono samples at the output rate.
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    /// Output-clock time (seconds) at which the first sample plays.
    pub scheduled_start: f64,
}

impl PlaybackChunk {
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn end(&self) -> f64 {
        self.scheduled_start + self.duration()
    }
}

/// What the caller gets back from [`PlaybackScheduler::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackHandle {
    pub id: ChunkId,
    pub scheduled_start: f64,
    pub duration: f64,
}

// ---------------------------------------------------------------------------
// PlaybackDevice
// ---------------------------------------------------------------------------

/// An output device that plays chunks at absolute clock positions.
pub trait PlaybackDevice {
    /// Current output-clock time in seconds.
    fn now(&self) -> f64;

    /// Rate the device expects chunks at.
    fn sample_rate(&self) -> u32;

    /// Queue `chunk` to start at `chunk.scheduled_start`.
    fn schedule(&mut self, chunk: PlaybackChunk) -> Result<(), AudioError>;

    /// Silence every queued or playing chunk immediately.
    fn stop_all(&mut self);

    /// Release the device; later `schedule` calls fail.
    fn release(&mut self) {
        self.stop_all();
    }
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

/// Owns the "next available start time" cursor for one output device.
pub struct PlaybackScheduler<D: PlaybackDevice> {
    device: D,
    next_cursor: f64,
    next_id: ChunkId,
    /// `(id, end)` of chunks that may still be sounding.
    outstanding: VecDeque<(ChunkId, f64)>,
}

impl<D: PlaybackDevice> PlaybackScheduler<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            next_cursor: 0.0,
            next_id: 0,
            outstanding: VecDeque::new(),
        }
    }

    /// Decode PCM16 `bytes` and schedule them right after the previous chunk.
    ///
    /// Returns `Ok(None)` for a payload with no whole samples.
    pub fn enqueue(&mut self, bytes: &[u8]) -> Result<Option<PlaybackHandle>, AudioError> {
        let samples = decode_pcm16(bytes);
        if samples.is_empty() {
            return Ok(None);
        }

        let now = self.device.now();
        self.prune(now);

        let chunk = PlaybackChunk {
            id: self.next_id,
            samples: samples.into(),
            sample_rate: self.device.sample_rate(),
            scheduled_start: now.max(self.next_cursor),
        };
        let handle = PlaybackHandle {
            id: chunk.id,
            scheduled_start: chunk.scheduled_start,
            duration: chunk.duration(),
        };
        let end = chunk.end();

        self.device.schedule(chunk)?;
        self.next_id += 1;
        self.next_cursor = end;
        self.outstanding.push_back((handle.id, end));
        Ok(Some(handle))
    }

    /// Stop everything and pull the cursor back to the output clock.
    ///
    /// Idempotent; fine with nothing outstanding.
    pub fn stop_all(&mut self) {
        self.device.stop_all();
        self.outstanding.clear();
        self.next_cursor = self.device.now();
    }

    /// Chunks that have not finished playing yet.
    pub fn outstanding(&mut self) -> usize {
        let now = self.device.now();
        self.prune(now);
        self.outstanding.len()
    }

    pub fn is_playing(&mut self) -> bool {
        self.outstanding() > 0
    }

    pub fn next_cursor(&self) -> f64 {
        self.next_cursor
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    fn prune(&mut self, now: f64) {
        while let Some(&(_, end)) = self.outstanding.front() {
            if end <= now {
                self.outstanding.pop_front();
            } else {
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
