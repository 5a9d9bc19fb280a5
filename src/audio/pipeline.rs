//! The audio engine owned by one session.
//!
//! [`AudioPipeline`] bundles the capture device, the playback scheduler and
//! the analysis tap.  It re-checks [`SessionContext::is_active`] before
//! scheduling anything, so a playback event that was already in flight
//! when teardown began is dropped instead of touching a released device.
//!
//! Teardown runs on every exit path: explicitly through
//! [`AudioPipeline::teardown`] and again from `Drop`.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::capture::{AnalysisTap, AudioError, CaptureDevice, CaptureTap};
use super::frame::AudioFrame;
use super::playback::{PlaybackDevice, PlaybackHandle, PlaybackScheduler};
use crate::config::AudioConfig;
use crate::session::SessionContext;

pub struct AudioPipeline<C: CaptureDevice, P: PlaybackDevice> {
    capture: C,
    scheduler: PlaybackScheduler<P>,
    analysis: AnalysisTap,
    ctx: Arc<SessionContext>,
    block_size: usize,
    input_rate: u32,
    capturing: bool,
    torn_down: bool,
}

impl<C: CaptureDevice, P: PlaybackDevice> AudioPipeline<C, P> {
    pub fn new(capture: C, playback: P, config: &AudioConfig, ctx: Arc<SessionContext>) -> Self {
        Self {
            capture,
            scheduler: PlaybackScheduler::new(playback),
            analysis: AnalysisTap::new(config.window_len()),
            ctx,
            block_size: config.frame_len(),
            input_rate: config.input_sample_rate,
            capturing: false,
            torn_down: false,
        }
    }

    /// Start the microphone, sending fixed-size frames to `frames`.
    ///
    /// The analysis tap is fed regardless of whether frames are wanted.
    pub fn start_capture(&mut self, frames: mpsc::Sender<AudioFrame>) -> Result<(), AudioError> {
        if self.torn_down {
            return Err(AudioError::Released);
        }
        if self.capturing {
            return Ok(());
        }
        let tap = CaptureTap::new(
            self.block_size,
            self.input_rate,
            frames,
            self.analysis.clone(),
            Arc::clone(&self.ctx),
        );
        self.capture.start(tap)?;
        self.capturing = true;
        Ok(())
    }

    pub fn stop_capture(&mut self) {
        if self.capturing {
            self.capture.stop();
            self.capturing = false;
        }
    }

    /// Schedule one chunk of PCM16 agent audio.
    ///
    /// Returns `Ok(None)` without scheduling once the session is inactive.
    pub fn enqueue_playback(&mut self, bytes: &[u8]) -> Result<Option<PlaybackHandle>, AudioError> {
        if self.torn_down || !self.ctx.is_active() {
            return Ok(None);
        }
        self.scheduler.enqueue(bytes)
    }

    pub fn stop_all_playback(&mut self) {
        if !self.torn_down {
            self.scheduler.stop_all();
        }
    }

    /// Stop capture, stop playback and release both devices.  Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.stop_capture();
        self.scheduler.stop_all();
        self.capture.release();
        self.scheduler.device_mut().release();
        self.analysis.clear();
        self.torn_down = true;
        log::debug!("audio: pipeline torn down");
    }

    pub fn analysis(&self) -> &AnalysisTap {
        &self.analysis
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn is_playing(&mut self) -> bool {
        !self.torn_down && self.scheduler.is_playing()
    }

    pub fn scheduler(&self) -> &PlaybackScheduler<P> {
        &self.scheduler
    }

    pub fn capture_device(&self) -> &C {
        &self.capture
    }
}

impl<C: CaptureDevice, P: PlaybackDevice> Drop for AudioPipeline<C, P> {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
