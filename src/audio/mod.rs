//! Audio engine: microphone capture, scheduled playback, level metering and
//! voice-activity detection.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → RateAdapter (mono, 16 kHz) → CaptureTap
//!                                                          ├─▶ AnalysisTap → VoiceActivityMonitor / InputLevel
//!                                                          └─▶ FrameAssembler → AudioFrame (mpsc) → session
//!
//! agent PCM16 (24 kHz) → PlaybackScheduler (cursor) → CpalPlayback timeline → speaker
//! ```
//!
//! Hardware sits behind [`CaptureDevice`] and [`PlaybackDevice`] so the
//! session logic can run against fakes in tests.

pub mod buffer;
pub mod capture;
pub mod frame;
pub mod level;
pub mod output;
pub mod pcm;
pub mod pipeline;
pub mod playback;
pub mod vad;

pub use buffer::RingBuffer;
pub use capture::{AnalysisTap, AudioError, CaptureDevice, CaptureTap, CpalCapture};
pub use frame::{AudioFrame, FrameAssembler};
pub use level::{rms, InputLevel};
pub use output::CpalPlayback;
pub use pcm::{decode_pcm16, encode_pcm16, RateAdapter};
pub use pipeline::AudioPipeline;
pub use playback::{ChunkId, PlaybackChunk, PlaybackDevice, PlaybackHandle, PlaybackScheduler};
pub use vad::{VoiceActivityMonitor, VoiceTransition};
