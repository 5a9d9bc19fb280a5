//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and handed to the
//! session runner by value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Directory name under the platform config dir.
const APP_DIR: &str = "agnes-voice";
const SETTINGS_FILE: &str = "settings.toml";

/// Environment variable consulted when `agent.api_key` is not set.
pub const API_KEY_ENV: &str = "AGENT_API_KEY";

const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
You are Agnes, a demanding but fair sales-training coach. You role-play a \
prospective customer so the trainee can practise discovery, objection \
handling and closing. Stay in character, keep answers short and \
conversational, and never break the role-play unless the trainee asks to \
end the session. When the session ends you give a final evaluation.";

// ---------------------------------------------------------------------------
// ResponseModality
// ---------------------------------------------------------------------------

/// What the agent streams back for each turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseModality {
    /// Spoken replies (inline PCM) plus transcription.
    Audio,
    /// Text-only replies.
    Text,
}

impl Default for ResponseModality {
    fn default() -> Self {
        Self::Audio
    }
}

impl ResponseModality {
    /// Wire name used in the `setup` message.
    pub fn wire_name(&self) -> &'static str {
        match self {
            ResponseModality::Audio => "AUDIO",
            ResponseModality::Text => "TEXT",
        }
    }
}

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

/// Fixed remote-agent configuration reused by every (re)connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// WebSocket endpoint of the realtime agent API.
    pub endpoint: String,
    /// API key; `None` falls back to the `AGENT_API_KEY` environment variable.
    pub api_key: Option<String>,
    /// Model identifier sent in the `setup` message.
    pub model: String,
    /// Prebuilt voice name for spoken replies.
    pub voice: String,
    /// Response modality requested from the agent.
    pub response_modality: ResponseModality,
    /// System instruction describing the coach persona.
    pub system_instruction: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".into(),
            api_key: None,
            model: "models/gemini-2.0-flash-live-001".into(),
            voice: "Aoede".into(),
            response_modality: ResponseModality::default(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.into(),
        }
    }
}

impl AgentConfig {
    /// The configured key, or the environment override when unset/empty.
    pub fn resolved_api_key(&self) -> Option<String> {
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => Some(key.to_string()),
            _ => std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()),
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Fixed wire sample rates and capture framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Rate of transmitted microphone frames in Hz.
    pub input_sample_rate: u32,
    /// Rate of received agent audio in Hz.
    pub output_sample_rate: u32,
    /// Samples per transmitted [`AudioFrame`](crate::audio::AudioFrame).
    pub block_size: usize,
    /// Samples kept in the analysis window read by the VAD.
    pub analysis_window: usize,
    /// Depth of the capture → session frame queue; excess frames are dropped.
    pub frame_queue: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            block_size: 2_048,
            analysis_window: 2_048,
            frame_queue: 64,
        }
    }
}

impl AudioConfig {
    /// Samples per frame; never zero.
    pub fn frame_len(&self) -> usize {
        self.block_size.max(1)
    }

    /// Analysis window length; never zero.
    pub fn window_len(&self) -> usize {
        self.analysis_window.max(1)
    }
}

// ---------------------------------------------------------------------------
// VadConfig
// ---------------------------------------------------------------------------

/// Voice-activity monitor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// RMS level above which the trainee counts as speaking.
    pub threshold: f32,
    /// Continuous silence required before leaving the speaking state.
    pub silence_timeout_ms: u64,
    /// Sampling cadence of the monitor loop.
    pub tick_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            silence_timeout_ms: 10_000,
            tick_ms: 50,
        }
    }
}

impl VadConfig {
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

// ---------------------------------------------------------------------------
// ScoringConfig
// ---------------------------------------------------------------------------

/// Completion heuristic and timeout of the final-score request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Window without a valid completion before the request times out.
    pub timeout_secs: u64,
    /// Accumulated length that completes on its own (with a score present).
    pub min_length: usize,
    /// Shorter length accepted once a closing phrase is present.
    pub closing_min_length: usize,
    /// Length accepted once the agent signals turn-complete.
    pub turn_complete_min_length: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 90,
            min_length: 500,
            closing_min_length: 20,
            turn_complete_min_length: 10,
        }
    }
}

impl ScoringConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// ReconnectConfig
// ---------------------------------------------------------------------------

/// Bounded retry policy for unexpected connection loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    /// Wait before each attempt.
    pub delay_ms: u64,
    /// How long an attempt may take to reach the Open state.
    pub open_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2_000,
            open_timeout_ms: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// VideoConfig
// ---------------------------------------------------------------------------

/// Low-frequency still frames sent alongside audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub enabled: bool,
    /// Minimum spacing between transmitted still frames.
    pub frame_interval_ms: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frame_interval_ms: 5_000,
        }
    }
}

// ---------------------------------------------------------------------------
// HotkeyConfig
// ---------------------------------------------------------------------------

/// Global hotkey bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotkeyConfig {
    /// Start in push-to-talk mode instead of continuous transmission.
    pub push_to_talk: bool,
    /// Push-to-talk key name (e.g. `"F9"`).
    pub push_to_talk_key: String,
    /// Toggles microphone mute.
    pub mute_key: String,
    /// Asks Agnes for the final score.
    pub score_key: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            push_to_talk: false,
            push_to_talk_key: "F9".into(),
            mute_key: "F8".into(),
            score_key: "F10".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use agnes_voice::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// assert_eq!(config.audio.input_sample_rate, 16_000);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub scoring: ScoringConfig,
    pub reconnect: ReconnectConfig,
    pub video: VideoConfig,
    pub hotkey: HotkeyConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// `settings.toml` under the platform config dir
    /// (`~/.config/agnes-voice/` on Linux).  Relative to the working
    /// directory when the platform reports no config dir.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .unwrap_or_default()
            .join(SETTINGS_FILE)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Save to an explicit path, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(original.agent, loaded.agent);
        assert_eq!(original.audio.block_size, loaded.audio.block_size);
        assert_eq!(original.vad.silence_timeout_ms, loaded.vad.silence_timeout_ms);
        assert_eq!(original.scoring.min_length, loaded.scoring.min_length);
        assert_eq!(original.reconnect.max_attempts, loaded.reconnect.max_attempts);
        assert_eq!(original.hotkey.score_key, loaded.hotkey.score_key);
    }

    #[test]
    fn default_path_is_settings_toml_in_app_dir() {
        let path = AppConfig::default_path();
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("settings.toml"));
        if dirs::config_dir().is_some() {
            assert!(path.parent().is_some_and(|p| p.ends_with("agnes-voice")));
        }
    }

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        assert_eq!(config.agent, AgentConfig::default());
        assert_eq!(config.audio.output_sample_rate, 24_000);
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.audio.input_sample_rate, 16_000);
        assert_eq!(cfg.audio.output_sample_rate, 24_000);
        assert_eq!(cfg.vad.silence_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.scoring.timeout(), Duration::from_secs(90));
        assert_eq!(cfg.reconnect.max_attempts, 3);
        assert_eq!(cfg.agent.response_modality, ResponseModality::Audio);
        assert!(!cfg.hotkey.push_to_talk);
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.agent.api_key = Some("key-123".into());
        cfg.agent.response_modality = ResponseModality::Text;
        cfg.scoring.timeout_secs = 45;
        cfg.reconnect.delay_ms = 500;
        cfg.hotkey.push_to_talk = true;

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(loaded.agent.api_key.as_deref(), Some("key-123"));
        assert_eq!(loaded.agent.response_modality, ResponseModality::Text);
        assert_eq!(loaded.scoring.timeout_secs, 45);
        assert_eq!(loaded.reconnect.delay_ms, 500);
        assert!(loaded.hotkey.push_to_talk);
    }

    #[test]
    fn explicit_api_key_wins() {
        let mut agent = AgentConfig::default();
        agent.api_key = Some("from-file".into());
        assert_eq!(agent.resolved_api_key().as_deref(), Some("from-file"));
    }

    #[test]
    fn zero_block_size_from_toml_is_clamped() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        let mut cfg = AppConfig::default();
        cfg.audio.block_size = 0;
        cfg.audio.analysis_window = 0;
        cfg.save_to(&path).expect("save");

        let loaded = AppConfig::load_from(&path).expect("load");
        assert_eq!(loaded.audio.block_size, 0);
        assert_eq!(loaded.audio.frame_len(), 1);
        assert_eq!(loaded.audio.window_len(), 1);
    }

    #[test]
    fn vad_tick_never_zero() {
        let vad = VadConfig {
            tick_ms: 0,
            ..VadConfig::default()
        };
        assert_eq!(vad.tick(), Duration::from_millis(1));
    }
}
