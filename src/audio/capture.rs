//! Microphone capture via `cpal`, with fan-out to the session and the VAD.
//!
//! The device callback hands every buffer to a [`CaptureTap`], which
//!
//! * feeds the shared [`AnalysisTap`] (always, so voice detection keeps
//!   running while transmission is suspended), and
//! * cuts fixed-size [`AudioFrame`]s and queues them for the session, but
//!   only while the session is active.
//!
//! [`CaptureDevice`] is the seam between the pipeline and real hardware;
//! [`CpalCapture`] is the production implementation.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::sync::mpsc;

use super::buffer::RingBuffer;
use super::frame::{AudioFrame, FrameAssembler};
use super::level::{rms, InputLevel};
use super::pcm::RateAdapter;
use crate::session::SessionContext;

// ---------------------------------------------------------------------------
// AudioError
// ---------------------------------------------------------------------------

/// Errors raised by the capture and playback devices.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio device found on the default host")]
    NoDevice,

    #[error("failed to query default stream config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build audio stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("unsupported sample rate {0} Hz")]
    UnsupportedRate(u32),

    #[error("failed to build resampler: {0}")]
    Resampler(#[from] rubato::ResamplerConstructionError),

    #[error("audio engine already released")]
    Released,
}

// ---------------------------------------------------------------------------
// AnalysisTap
// ---------------------------------------------------------------------------

/// Shared window of the most recent microphone samples.
///
/// Written by the capture callback thread, read by the VAD tick.  Locks are
/// held only for a copy; a poisoned lock reads as silence.
#[derive(Clone)]
pub struct AnalysisTap {
    window: Arc<Mutex<RingBuffer<f32>>>,
}

impl AnalysisTap {
    pub fn new(window_len: usize) -> Self {
        Self {
            window: Arc::new(Mutex::new(RingBuffer::new(window_len.max(1)))),
        }
    }

    pub fn push(&self, samples: &[f32]) {
        if let Ok(mut window) = self.window.lock() {
            window.push_slice(samples);
        }
    }

    /// RMS magnitude of the current window.
    pub fn magnitude(&self) -> f32 {
        self.window
            .lock()
            .map(|w| rms(&w.snapshot()))
            .unwrap_or(0.0)
    }

    pub fn level(&self, num_bars: usize) -> InputLevel {
        let samples = self
            .window
            .lock()
            .map(|w| w.snapshot())
            .unwrap_or_default();
        InputLevel::measure(&samples, num_bars)
    }

    pub fn clear(&self) {
        if let Ok(mut window) = self.window.lock() {
            window.clear();
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureTap
// ---------------------------------------------------------------------------

/// Sink owned by the capture callback: analysis tap plus framed output.
pub struct CaptureTap {
    assembler: FrameAssembler,
    frames: mpsc::Sender<AudioFrame>,
    analysis: AnalysisTap,
    ctx: Arc<SessionContext>,
    dropped: u64,
}

impl CaptureTap {
    pub fn new(
        block_size: usize,
        sample_rate: u32,
        frames: mpsc::Sender<AudioFrame>,
        analysis: AnalysisTap,
        ctx: Arc<SessionContext>,
    ) -> Self {
        Self {
            assembler: FrameAssembler::new(block_size, sample_rate),
            frames,
            analysis,
            ctx,
            dropped: 0,
        }
    }

    /// Feed mono samples at the input rate.
    ///
    /// Never blocks: a full queue drops the frame.
    pub fn push(&mut self, samples: &[f32]) {
        self.analysis.push(samples);

        if !self.ctx.is_active() {
            self.assembler.reset();
            return;
        }

        for frame in self.assembler.push(samples) {
            match self.frames.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped += 1;
                    if self.dropped % 50 == 1 {
                        log::warn!("capture: frame queue full, dropped {} frames", self.dropped);
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

// ---------------------------------------------------------------------------
// CaptureDevice
// ---------------------------------------------------------------------------

/// A microphone that can deliver mono samples at the input rate.
pub trait CaptureDevice {
    /// Begin invoking `tap` until [`stop`](Self::stop).
    fn start(&mut self, tap: CaptureTap) -> Result<(), AudioError>;

    /// Stop delivering samples.  Safe to call when not started.
    fn stop(&mut self);

    /// Release the device entirely; later `start` calls fail.
    fn release(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// CpalCapture
// ---------------------------------------------------------------------------

/// Default-input-device capture built on `cpal`.
///
/// The device is opened lazily in [`start`](CaptureDevice::start) so a
/// missing microphone surfaces as [`AudioError::NoDevice`] at the moment
/// the session tries to use it.
pub struct CpalCapture {
    input_rate: u32,
    stream: Option<cpal::Stream>,
    released: bool,
}

impl CpalCapture {
    /// `input_rate` is the fixed wire rate frames are delivered at.
    pub fn new(input_rate: u32) -> Self {
        Self {
            input_rate,
            stream: None,
            released: false,
        }
    }
}

impl CaptureDevice for CpalCapture {
    fn start(&mut self, mut tap: CaptureTap) -> Result<(), AudioError> {
        if self.released {
            return Err(AudioError::Released);
        }
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(AudioError::NoDevice)?;
        let supported = device.default_input_config()?;

        let channels = supported.channels();
        let device_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();
        let input_rate = self.input_rate;
        let mut adapter = RateAdapter::new(device_rate, input_rate, channels)?;

        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let samples = adapter.process(data);
                if !samples.is_empty() {
                    tap.push(&samples);
                }
            },
            |err: cpal::StreamError| {
                log::error!("capture: cpal stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        log::info!("capture: started ({device_rate} Hz, {channels} ch → {input_rate} Hz mono)");
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            log::debug!("capture: stopped");
        }
    }

    fn release(&mut self) {
        self.stop();
        self.released = true;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tap_with(
        ctx: Arc<SessionContext>,
        queue: usize,
    ) -> (CaptureTap, mpsc::Receiver<AudioFrame>, AnalysisTap) {
        let (tx, rx) = mpsc::channel(queue);
        let analysis = AnalysisTap::new(64);
        let tap = CaptureTap::new(4, 16_000, tx, analysis.clone(), ctx);
        (tap, rx, analysis)
    }

    #[test]
    fn active_session_receives_frames_and_analysis() {
        let ctx = Arc::new(SessionContext::new());
        ctx.activate();
        let (mut tap, mut rx, analysis) = tap_with(ctx, 8);

        tap.push(&[0.5; 8]);

        assert_eq!(rx.try_recv().map(|f| f.seq).ok(), Some(0));
        assert_eq!(rx.try_recv().map(|f| f.seq).ok(), Some(1));
        assert!((analysis.magnitude() - 0.5).abs() < 1e-5);
    }

    #[test]
    fn inactive_session_still_feeds_analysis_but_no_frames() {
        let ctx = Arc::new(SessionContext::new());
        let (mut tap, mut rx, analysis) = tap_with(ctx, 8);

        tap.push(&[0.3; 16]);

        assert!(rx.try_recv().is_err());
        assert!(analysis.magnitude() > 0.2);
    }

    #[test]
    fn frames_stop_the_moment_session_deactivates() {
        let ctx = Arc::new(SessionContext::new());
        ctx.activate();
        let (mut tap, mut rx, _analysis) = tap_with(Arc::clone(&ctx), 8);

        tap.push(&[0.1; 4]);
        ctx.deactivate();
        for _ in 0..10 {
            tap.push(&[0.1; 4]);
        }

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let ctx = Arc::new(SessionContext::new());
        ctx.activate();
        let (mut tap, _rx, _analysis) = tap_with(ctx, 1);

        tap.push(&[0.1; 12]); // three frames, room for one
        assert_eq!(tap.dropped(), 2);
    }

    #[test]
    fn analysis_clear_reads_silence() {
        let analysis = AnalysisTap::new(16);
        analysis.push(&[0.9; 16]);
        analysis.clear();
        assert_eq!(analysis.magnitude(), 0.0);
        assert_eq!(analysis.level(4).bars, vec![0.0; 4]);
    }
}
