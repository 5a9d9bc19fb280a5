//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), one sub-config per subsystem,
//! and TOML persistence via `AppConfig::load` / `AppConfig::save` at
//! [`AppConfig::default_path`].

pub mod settings;

pub use settings::{
    AgentConfig, AppConfig, AudioConfig, HotkeyConfig, ReconnectConfig, ResponseModality,
    ScoringConfig, VadConfig, VideoConfig, API_KEY_ENV,
};
