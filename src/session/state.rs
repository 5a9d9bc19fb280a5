//! Observable session state for the UI layer.
//!
//! [`ConnectionState`] is owned by the connection manager; [`ActivityState`]
//! is the coarse "what is happening" indicator.  Both, plus the transcript,
//! score, error slot and level meter, live in [`UiState`] behind
//! [`SharedState`], which the runner writes and any front end reads.

use std::sync::{Arc, Mutex};

use super::transcript::TranscriptEntry;

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Lifecycle of the agent link.
///
/// ```text
/// Idle ──connect()──▶ Connecting ──opened──▶ Open ──close()──▶ Closing ──▶ Closed
///                         │                   │
///                         └────── failure ────┴──▶ Error
/// Closed / Error ──connect()──▶ Connecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Error,
}

impl ConnectionState {
    /// States from which `connect()` may start a new link.
    pub fn can_connect(&self) -> bool {
        matches!(
            self,
            ConnectionState::Idle | ConnectionState::Closed | ConnectionState::Error
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Open => "Open",
            ConnectionState::Closing => "Closing",
            ConnectionState::Closed => "Closed",
            ConnectionState::Error => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// ActivityState
// ---------------------------------------------------------------------------

/// Coarse activity indicator shown next to the avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivityState {
    #[default]
    Idle,
    /// The trainee is speaking.
    Listening,
    /// Waiting for the agent to answer.
    Thinking,
    /// A score request is running.
    Scoring,
    /// Agent audio is playing.
    Responding,
}

impl ActivityState {
    pub fn label(&self) -> &'static str {
        match self {
            ActivityState::Idle => "Idle",
            ActivityState::Listening => "Listening",
            ActivityState::Thinking => "Thinking",
            ActivityState::Scoring => "Scoring",
            ActivityState::Responding => "Responding",
        }
    }
}

// ---------------------------------------------------------------------------
// UiState
// ---------------------------------------------------------------------------

/// Everything a front end needs to render the session.
#[derive(Debug, Clone, Default)]
pub struct UiState {
    /// `true` while the link is Open.
    pub connected: bool,
    pub connection: ConnectionState,
    pub activity: ActivityState,
    /// Durable (final) transcript entries in order.
    pub transcript: Vec<TranscriptEntry>,
    /// Final numeric score, once a score request completed.
    pub score: Option<u8>,
    /// Narrative feedback that came with the score.
    pub score_feedback: Option<String>,
    /// The single current error; replaced, never queued.
    pub error_message: Option<String>,
    pub reconnecting: bool,
    pub muted: bool,
    /// Input level bars of the latest analysis window.
    pub level: Vec<f32>,
}

impl UiState {
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.error_message = None;
    }

    pub fn set_connection(&mut self, state: ConnectionState) {
        self.connection = state;
        self.connected = state == ConnectionState::Open;
    }
}

/// Thread-safe handle to [`UiState`]. Do not hold the lock across `.await`.
pub type SharedState = Arc<Mutex<UiState>>;

pub fn new_shared_state() -> SharedState {
    Arc::new(Mutex::new(UiState::default()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
