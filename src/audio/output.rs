//! `cpal` output device for scheduled agent audio.
//!
//! The output callback is the clock: each device frame it renders advances
//! a shared timeline by `1 / device_rate` seconds.  Chunks sit on that
//! timeline at absolute start times and are mixed in as the clock passes
//! over them, so the scheduler upstream never has to know about device
//! buffer sizes.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::capture::AudioError;
use super::playback::{PlaybackChunk, PlaybackDevice};

struct Timeline {
    /// Device frames rendered since the stream started.
    rendered: u64,
    device_rate: u32,
    chunks: Vec<PlaybackChunk>,
}

impl Timeline {
    fn new(device_rate: u32) -> Self {
        Self {
            rendered: 0,
            device_rate: device_rate.max(1),
            chunks: Vec::new(),
        }
    }

    /// Output clock in seconds.
    fn clock(&self) -> f64 {
        self.rendered as f64 / self.device_rate as f64
    }

    fn render(&mut self, out: &mut [f32], channels: usize) {
        for frame in out.chunks_mut(channels.max(1)) {
            let t = self.clock();
            let mut value = 0.0_f32;
            for chunk in &self.chunks {
                if t < chunk.scheduled_start {
                    continue;
                }
                let idx = ((t - chunk.scheduled_start) * chunk.sample_rate as f64) as usize;
                if let Some(&s) = chunk.samples.get(idx) {
                    value += s;
                }
            }
            let value = value.clamp(-1.0, 1.0);
            for sample in frame.iter_mut() {
                *sample = value;
            }
            self.rendered += 1;
        }
        let now = self.clock();
        self.chunks.retain(|c| c.end() > now);
    }
}

/// Default-output-device playback built on `cpal`.
pub struct CpalPlayback {
    output_rate: u32,
    timeline: Arc<Mutex<Timeline>>,
    stream: Option<cpal::Stream>,
    released: bool,
}

impl CpalPlayback {
    /// Open the default output device and start its (initially silent) stream.
    ///
    /// `output_rate` is the rate agent audio arrives at.
    pub fn open(output_rate: u32) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
        let supported = device.default_output_config()?;

        let channels = supported.channels() as usize;
        let device_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        let timeline = Arc::new(Mutex::new(Timeline::new(device_rate)));
        let shared = Arc::clone(&timeline);

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match shared.lock() {
                Ok(mut tl) => tl.render(data, channels),
                Err(_) => data.fill(0.0),
            },
            |err: cpal::StreamError| {
                log::error!("playback: cpal stream error: {err}");
            },
            None,
        )?;
        stream.play()?;
        log::info!("playback: started ({device_rate} Hz device, {output_rate} Hz agent audio)");

        Ok(Self {
            output_rate,
            timeline,
            stream: Some(stream),
            released: false,
        })
    }
}

impl PlaybackDevice for CpalPlayback {
    fn now(&self) -> f64 {
        self.timeline.lock().map(|tl| tl.clock()).unwrap_or(0.0)
    }

    fn sample_rate(&self) -> u32 {
        self.output_rate
    }

    fn schedule(&mut self, chunk: PlaybackChunk) -> Result<(), AudioError> {
        if self.released {
            return Err(AudioError::Released);
        }
        if let Ok(mut tl) = self.timeline.lock() {
            tl.chunks.push(chunk);
        }
        Ok(())
    }

    fn stop_all(&mut self) {
        if let Ok(mut tl) = self.timeline.lock() {
            tl.chunks.clear();
        }
    }

    fn release(&mut self) {
        self.stop_all();
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            log::debug!("playback: released");
        }
        self.released = true;
    }
}
