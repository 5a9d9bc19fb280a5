//! Realtime voice session orchestrator for the Agnes sales-training coach.
//!
//! The crate drives one live conversation between a trainee and a remote
//! conversational agent: microphone capture, gap-free playback of streamed
//! agent audio, voice-activity detection, the final-score sub-protocol and
//! bounded reconnection.
//!
//! ```text
//! SessionCommand ─▶ SessionRunner ─┬─ SessionConnectionManager ─┬─ AgentLink (ws)
//!                                  │                            └─ AudioPipeline
//!                                  ├─ VoiceActivityMonitor
//!                                  ├─ ScoreRequestProtocol
//!                                  └─ ReconnectionController
//! ```

pub mod audio;
pub mod collab;
pub mod config;
pub mod error;
pub mod hotkey;
pub mod reconnect;
pub mod scoring;
pub mod session;

pub use error::SessionError;
